use clap::Parser;

pub const PORT: u16 = 6379;

pub const HOST: &str = "127.0.0.1";

/// Upper bound for a single buffered request: 512 MiB, one maximum sized bulk string.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about)]
pub struct Config {
    /// The address to bind to
    #[arg(long, env = "REDSTREAM_HOST", default_value = HOST)]
    pub host: String,

    /// The port to listen on
    #[arg(short, long, env = "REDSTREAM_PORT", default_value_t = PORT)]
    pub port: u16,

    /// Largest request, in bytes, a client may have buffered before the connection is closed
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: HOST.to_string(),
            port: PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
