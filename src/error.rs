use core::fmt;

/// Result alias for `jetree`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the clustering engine and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Input was empty.
    EmptyInput,

    /// A configuration string did not name a known option.
    UnknownOption {
        /// Configuration key being parsed.
        key: &'static str,
        /// The unrecognised value.
        value: String,
    },

    /// Invalid parameter value.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: String,
    },

    /// A jet collection was run with hyperparameters that differ from the recorded ones.
    HyperparameterMismatch {
        /// Name of the jet collection.
        jet_name: String,
        /// Offending parameter key.
        key: String,
        /// Value already on record (`<missing>` if absent).
        recorded: String,
        /// Value supplied by the current run (`<missing>` if absent).
        current: String,
    },

    /// Internal bookkeeping went wrong; never recovered silently.
    InvariantViolation(String),

    /// Malformed text from the alternative engine.
    Parse {
        /// 1-based line number, 0 when the problem is not tied to a line.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// The alternative engine produced no output within the retry bound.
    SubprocessFailure {
        /// Number of attempts made.
        attempts: usize,
    },

    /// I/O failure while talking to a subprocess.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyInput => write!(f, "empty input provided"),
            Error::UnknownOption { key, value } => {
                write!(f, "unrecognised value '{value}' for {key}")
            }
            Error::InvalidParameter { name, message } => {
                write!(f, "invalid parameter '{name}': {message}")
            }
            Error::HyperparameterMismatch {
                jet_name,
                key,
                recorded,
                current,
            } => write!(
                f,
                "hyperparameter mismatch for {jet_name}: {key} recorded as {recorded}, now {current}"
            ),
            Error::InvariantViolation(msg) => write!(f, "internal invariant violated: {msg}"),
            Error::Parse { line, message } => {
                if *line == 0 {
                    write!(f, "parse error: {message}")
                } else {
                    write!(f, "parse error on line {line}: {message}")
                }
            }
            Error::SubprocessFailure { attempts } => {
                write!(f, "alternative engine gave no output after {attempts} attempts")
            }
            Error::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
