#[tokio::main]
async fn main() {
    if let Err(err) = servicenow_mcp::mcp::server::run_stdio().await {
        eprintln!("servicenow-mcp: {}", err.render());
        std::process::exit(1);
    }
}
