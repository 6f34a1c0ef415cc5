use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by channels, sinks and configuration.
///
/// Anything that goes wrong while a sink handles a single event surfaces from
/// [`crate::sinker::Sink::process`] as [`Error::Delivery`]; the other variants show up from
/// setup code and from channel implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Channel Error - {0}")]
    Channel(String),

    #[error("Channel Full - {0}")]
    ChannelFull(String),

    #[error("Delivery Error - {0}")]
    Delivery(String),

    #[error("IO Error - {0}")]
    Io(String),
}

impl Error {
    /// Folds any error into the single delivery failure kind reported by a sink.
    pub(crate) fn into_delivery(self) -> Self {
        match self {
            Error::Delivery(_) => self,
            other => Error::Delivery(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Config("missing key".to_string()).to_string(),
            "Config Error - missing key"
        );
        assert_eq!(
            Error::ChannelFull("c1".to_string()).to_string(),
            "Channel Full - c1"
        );
    }

    #[test]
    fn test_into_delivery() {
        let err = Error::Io("disk full".to_string()).into_delivery();
        assert_eq!(err, Error::Delivery("IO Error - disk full".to_string()));

        let err = Error::Delivery("bad utf-8".to_string()).into_delivery();
        assert_eq!(err, Error::Delivery("bad utf-8".to_string()));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory");
        assert!(matches!(Error::from(io), Error::Io(msg) if msg.contains("no such directory")));
    }
}
