pub mod access;
pub mod confidence;
pub mod lockout;
pub mod password;
pub mod session;
pub mod similarity;
