// Background transcode worker

use std::any::Any;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

use super::probe::CapabilityProbe;
use super::{CancelToken, JobState, TranscodeError, TranscodeEvent, TranscodeRequest, Transcoded, Transcoder};

/// Message from the worker thread to the caller
#[derive(Debug)]
pub enum WorkerMessage {
    StateChanged { job_id: Uuid, state: JobState },

    /// One line of ffmpeg stderr
    LogLine { job_id: Uuid, line: String },

    /// Always the last message for a job
    Finished {
        job_id: Uuid,
        result: Result<Transcoded, TranscodeError>,
    },
}

/// A transcode running on its own thread
pub struct TranscodeHandle {
    job_id: Uuid,
    rx: Receiver<WorkerMessage>,
    cancel: CancelToken,
    join: JoinHandle<()>,
}

impl TranscodeHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Get the receiver for worker messages
    pub fn receiver(&self) -> &Receiver<WorkerMessage> {
        &self.rx
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Drain messages until the job finishes, handing every message to `on_message`.
    ///
    /// Returns the job result, or `WorkerPanicked` if the thread died without reporting.
    pub fn wait<F>(self, mut on_message: F) -> Result<Transcoded, TranscodeError>
    where
        F: FnMut(&WorkerMessage),
    {
        let mut outcome = None;
        for message in self.rx.iter() {
            on_message(&message);
            if let WorkerMessage::Finished { result, .. } = message {
                outcome = Some(result);
                break;
            }
        }
        match self.join.join() {
            Ok(()) => outcome.unwrap_or_else(|| {
                Err(TranscodeError::WorkerPanicked(
                    "worker exited without a result".to_string(),
                ))
            }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(job_id = %self.job_id, %message, "transcode worker panicked");
                outcome.unwrap_or(Err(TranscodeError::WorkerPanicked(message)))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `request` on a dedicated thread, streaming events over a channel
pub fn spawn_transcode<P>(transcoder: Transcoder<P>, request: TranscodeRequest) -> TranscodeHandle
where
    P: CapabilityProbe + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let job_id = request.job_id();

    let worker_cancel = cancel.clone();
    let join = thread::spawn(move || {
        let events = tx.clone();
        let result = transcoder.transcode_with_cancel(&request, &worker_cancel, |event| {
            let message = match event {
                TranscodeEvent::StateChanged(state) => WorkerMessage::StateChanged {
                    job_id,
                    state: state.clone(),
                },
                TranscodeEvent::LogLine(line) => WorkerMessage::LogLine {
                    job_id,
                    line: line.to_string(),
                },
            };
            // Receiver gone means nobody is listening; keep encoding anyway
            let _ = events.send(message);
        });
        let _ = tx.send(WorkerMessage::Finished { job_id, result });
    });

    TranscodeHandle {
        job_id,
        rx,
        cancel,
        join,
    }
}
