// Binary entry point for pathjail
// This is a thin wrapper that delegates to the library implementation

#[tokio::main]
async fn main() {
    let code = pathjail::shell::run().await;
    std::process::exit(code);
}
