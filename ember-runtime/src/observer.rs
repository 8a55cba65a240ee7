//! Streaming inference observer

use std::io::{self, Write};

use ember::Error;

use crate::responses::Responses;

/// Observer of a streaming generation.
///
/// Passed explicitly into the session's streaming entry points. The default
/// callbacks print to stdout, matching the behavior callers get when they
/// only care about the first candidate.
pub trait InferenceObservable {
    /// Called with the accumulated candidates after each decode step.
    fn on_next(&mut self, responses: &Responses) {
        if let Ok(text) = responses.response_text_at(0) {
            print!("{text}");
            let _ = io::stdout().flush();
        }
    }

    /// Called once when the generation terminates cleanly.
    fn on_done(&mut self) {
        println!("Inference Done.");
    }

    /// Called when the generation fails.
    fn on_error(&mut self, error: &Error) {
        println!("Inference Error: {error}");
    }
}
