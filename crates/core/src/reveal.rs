//! Character-by-character reveal of bot messages.

use crate::driver::ChatView;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::oneshot, task::JoinHandle};

/// A running reveal. Cancelling it writes the rest of the text at once.
pub struct RevealHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Starts revealing `text` into a new bot message, one character per `per_char`.
pub fn spawn_reveal(view: Arc<dyn ChatView>, text: String, per_char: Duration) -> RevealHandle {
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        view.begin_bot_message();
        let mut detached = false;
        let mut buf = [0u8; 4];
        for (idx, ch) in text.char_indices() {
            view.append_bot_text(ch.encode_utf8(&mut buf));
            let rest = &text[idx + ch.len_utf8()..];
            if rest.is_empty() {
                break;
            }
            tokio::select! {
                signal = &mut cancel_rx, if !detached => match signal {
                    Ok(()) => {
                        view.append_bot_text(rest);
                        break;
                    }
                    // Handle dropped without cancelling; keep revealing.
                    Err(_) => detached = true,
                },
                _ = tokio::time::sleep(per_char) => {}
            }
        }
        view.end_bot_message();
    });
    RevealHandle {
        cancel: Some(cancel_tx),
        task,
    }
}

impl RevealHandle {
    /// Flushes the remaining text and waits until the message is closed.
    pub async fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }

    /// Waits for the reveal to run to completion.
    pub async fn finished(self) {
        let _ = self.task.await;
    }
}
