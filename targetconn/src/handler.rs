/// Response handlers
/// 
/// A response handler is bound to exactly one in-flight command. The engine
/// feeds it every output line belonging to that command until it reports a
/// terminal state.

use crate::types::{GdbOutput, GdbResult, OutputLine, ResultClass};
use crate::TargetError;

/// What a handler wants after consuming one line
#[derive(Debug)]
pub enum Feed<T> {
    /// The response is not complete yet
    NeedMore,
    /// The response is complete
    Done(T),
    /// The output did not match what the command produces, or GDB reported an error
    Error(TargetError),
}

/// Parser for the output of one command kind
pub trait ResponseHandler: Send {
    type Output: Send;

    fn feed(&mut self, line: &OutputLine) -> Feed<Self::Output>;
}

/// Turn an `^error` result into the matching failure
pub(crate) fn check_result(result: &GdbResult) -> Result<(), TargetError> {
    if result.class == ResultClass::Error {
        log::error!("GDB ERROR -> {}", result.error_message());
        Err(TargetError::CommandFailed(result.error_message().to_string()))
    } else {
        Ok(())
    }
}

/// Handler for plain MI commands: resolves with the command's result record
/// once the following prompt has been read
#[derive(Debug, Default)]
pub struct MiResultHandler {
    result: Option<GdbResult>,
}

impl MiResultHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseHandler for MiResultHandler {
    type Output = GdbResult;

    fn feed(&mut self, line: &OutputLine) -> Feed<GdbResult> {
        match line {
            OutputLine::Record(GdbOutput::Result(result)) => {
                if let Err(e) = check_result(result) {
                    return Feed::Error(e);
                }
                // GDB does not print a prompt after ^exit
                if result.class == ResultClass::Exit {
                    return Feed::Done(result.clone());
                }
                self.result = Some(result.clone());
                Feed::NeedMore
            }
            OutputLine::Prompt => match self.result.take() {
                Some(result) => Feed::Done(result),
                None => Feed::NeedMore,
            },
            OutputLine::Record(_) => Feed::NeedMore,
        }
    }
}
