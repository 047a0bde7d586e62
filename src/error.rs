use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// Listing the serial ports of the host failed.
    #[error("Could not list serial ports. Problem: {0}")]
    Enumeration(String),

    /// A device was found but the link to it could not be opened.
    #[error("Could not open `{path}`. Problem: {problem}")]
    Open {
        /// The path we tried to open.
        path: String,

        /// Why opening failed.
        problem: String,
    },

    /// The link failed during an established session.
    #[error("Link problem: {0}")]
    Io(String),

    /// A connection attempt is already in flight.
    #[error("A connection attempt is already in progress")]
    AttemptInFlight,

    /// Bad json.
    #[error("The request `{request}` could not be deserialized. Problem: {problem}")]
    BadJson {
        /// The problematic request.
        request: String,

        /// The deserialization issue.
        problem: String,
    },

    /// The configuration is not valid.
    #[error("The configuration is not valid. Problem: {0}")]
    BadConfig(String),

    /// Some issue with the websocket connection.
    #[error("Websocket issue: {0}")]
    WebsocketIssue(String),

    /// The link actor is no longer running.
    #[error("The link task has stopped")]
    ActorGone,
}

impl Error {
    /// If the error is a bad configuration, get the problem description.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(problem) = self {
            Ok(problem)
        } else {
            Err(self)
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebsocketIssue(e.to_string())
    }
}
