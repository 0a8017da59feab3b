use clap::Parser;
use log::error;
use squeak::client::cli::{self, Cli};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    match cli::run(cli).await {
        Ok(message) => println!("{}", message),
        Err(err) => {
            error!("{:?}", err);
            eprintln!("{}", cli::failure_message(&err));
            std::process::exit(1);
        }
    }
}
