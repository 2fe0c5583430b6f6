use crossbar_database::DatabaseError;
use thiserror::Error;

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("preference storage failed: {0}")]
    Storage(#[from] DatabaseError),

    #[error("{0} needs an argument")]
    MissingArgument(&'static str),

    #[error("sender has no stable user id")]
    AnonymousSender,

    #[error("only gateway admins may use {0}")]
    NotAdmin(&'static str),
}
