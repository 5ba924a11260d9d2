pub const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PasswordWeakness {
	TooShort,
	MissingUppercase,
	MissingLowercase,
	MissingDigit,
}
impl PasswordWeakness {
	pub fn message(self) -> &'static str {
		match self {
			Self::TooShort => "Password must be at least 8 characters long.",
			Self::MissingUppercase => "Password must contain an uppercase letter.",
			Self::MissingLowercase => "Password must contain a lowercase letter.",
			Self::MissingDigit => "Password must contain a digit.",
		}
	}
}

pub fn check_strength(password: &str) -> Result<(), PasswordWeakness> {
	if password.chars().count() < MIN_PASSWORD_CHARS {
		return Err(PasswordWeakness::TooShort);
	}
	if !password.chars().any(char::is_uppercase) {
		return Err(PasswordWeakness::MissingUppercase);
	}
	if !password.chars().any(char::is_lowercase) {
		return Err(PasswordWeakness::MissingLowercase);
	}
	if !password.chars().any(|ch| ch.is_ascii_digit()) {
		return Err(PasswordWeakness::MissingDigit);
	}

	Ok(())
}

/// Usernames compare case-insensitively and ignore surrounding whitespace.
pub fn normalize_username(raw: &str) -> String {
	raw.trim().to_lowercase()
}
