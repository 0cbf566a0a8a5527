mod alertmanager;
mod buildinfo;
mod cachet;
mod cli;
mod metrics;
mod resolver;
mod server;
mod sync;
#[cfg(test)]
mod testing;
mod types;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
