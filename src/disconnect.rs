use crate::protocol::packet::Disconnect;
use std::{borrow::Cow, fmt};

/// Why the proxy ends a session, as a translation key plus arguments.
///
/// `Display` renders the English text, which is what the client is
/// shown unless a translator replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    key: Cow<'static, str>,
    args: Vec<String>,
}

impl DisconnectReason {
    pub fn new(key: impl Into<Cow<'static, str>>, args: Vec<String>) -> Self {
        Self {
            key: key.into(),
            args,
        }
    }

    pub fn queue_overflow() -> Self {
        Self::new("proxy.queue.overflow", Vec::new())
    }

    pub fn transfer_failed(server: &str, message: &str) -> Self {
        Self::new(
            "proxy.transfer.failed",
            vec![server.to_owned(), message.to_owned()],
        )
    }

    pub fn backend_closed(server: &str) -> Self {
        Self::new("proxy.backend.closed", vec![server.to_owned()])
    }

    pub fn backend_kicked(server: &str, message: &str) -> Self {
        Self::new(
            "proxy.backend.kicked",
            vec![server.to_owned(), message.to_owned()],
        )
    }

    pub fn no_fallback() -> Self {
        Self::new("proxy.fallback.none", Vec::new())
    }

    pub fn unsupported_version(version: i32) -> Self {
        Self::new("proxy.version.unsupported", vec![version.to_string()])
    }

    pub fn protocol_error(error: impl fmt::Display) -> Self {
        Self::new("proxy.protocol.error", vec![error.to_string()])
    }

    pub fn proxy_shutdown() -> Self {
        Self::new("proxy.shutdown", Vec::new())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn to_packet(&self) -> Disconnect {
        Disconnect::with_message(self.to_string())
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.key {
            "proxy.queue.overflow" => f.write_str("Too many packets queued for your connection"),
            "proxy.transfer.failed" => write!(
                f,
                "Could not connect to {}: {}",
                self.arg(0),
                self.arg(1)
            ),
            "proxy.backend.closed" => write!(f, "Lost connection to {}", self.arg(0)),
            "proxy.backend.kicked" => write!(f, "Kicked from {}: {}", self.arg(0), self.arg(1)),
            "proxy.fallback.none" => f.write_str("No server is available right now"),
            "proxy.version.unsupported" => {
                write!(f, "Protocol version {} is not supported", self.arg(0))
            }
            "proxy.protocol.error" => write!(f, "Protocol error: {}", self.arg(0)),
            "proxy.shutdown" => f.write_str("The proxy is shutting down"),
            key => {
                f.write_str(key)?;
                for arg in &self.args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}
