use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "chatline-server", about = "Chatline realtime chat server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/chatline.toml")]
    pub config: String,
}
