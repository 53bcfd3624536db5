use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    /// Whether playroom's clients connect to it over https.
    /// If so, the session cookie is sent as a secure cookie.
    #[arg(short, long)]
    secure: bool,

    /// The address playroom should listen on. By default
    /// playroom will listen just on the IPv4 loopback.
    #[arg(short, long)]
    address: Option<String>,

    /// The port playroom listens on.
    #[arg(short, long, default_value_t = 80)]
    port: u16,

    /// Directory holding the user database.
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Directory served under /static (game scripts and assets).
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,

    /// Directory for session files. Without one, sessions live in
    /// a temporary directory that's removed when playroom exits.
    #[arg(long)]
    session_dir: Option<PathBuf>,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    pub fn session_dir(&self) -> Option<&Path> {
        self.session_dir.as_deref()
    }
}
