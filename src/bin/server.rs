use clap::Parser;
use rustongo::server::Server;
use rustongo::Error;

const PORT: u16 = 47017;

#[derive(Parser, Debug)]
struct Args {
    /// The port to listen on
    #[arg(short, long, default_value_t = PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt().try_init();

    let args = Args::parse();

    let mut server = Server::bind(("127.0.0.1", args.port)).await?;
    server.start();
    server.wait().await
}
