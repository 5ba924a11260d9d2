use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = facegate::Args::parse();

	facegate::run(args).await
}
