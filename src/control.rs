use crate::registry::Inner;
use crossbeam_channel::{after, bounded, select, Receiver, Sender};
use log::debug;
use std::{io, sync::Arc, thread};

pub(crate) enum ControlMessage {
    Stop,
}

/// Handle to a running publisher thread.
pub(crate) struct Scheduler {
    control_tx: Sender<ControlMessage>,
}

impl Scheduler {
    pub(crate) fn spawn(inner: Arc<Inner>, builder: thread::Builder) -> Result<Scheduler, io::Error> {
        let (control_tx, control_rx) = bounded(1);
        builder.spawn(move || run(inner, control_rx))?;
        Ok(Scheduler { control_tx })
    }

    /// Asks the thread to exit.  A publish already underway runs to completion first.
    pub(crate) fn stop(self) { let _ = self.control_tx.try_send(ControlMessage::Stop); }
}

fn run(inner: Arc<Inner>, control_rx: Receiver<ControlMessage>) {
    debug!("publisher thread started");
    loop {
        let delay = inner.next_publish_delay();
        let ticked = select! {
            recv(control_rx) -> msg => match msg {
                Ok(ControlMessage::Stop) | Err(_) => false,
            },
            recv(after(delay)) -> _ => true,
        };
        if !ticked {
            break;
        }
        inner.publish_if_open();
    }
    debug!("publisher thread stopped");
}
