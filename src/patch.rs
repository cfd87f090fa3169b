//! Byte-range text edits and the read-compute-verify-write loop that is the
//! only way note text gets modified.

use std::future::Future;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{Error, Result};
use crate::host::FileStore;
use crate::wait::ConsistencyWait;

/// Replace `text[start..end]`, which must still read `old_content`, with
/// `new_content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub start: usize,
    pub end: usize,
    pub old_content: String,
    pub new_content: String,
}

/// Splices sorted, non-overlapping edits into `text`.
///
/// Overlapping or empty ranges are logic errors. `Ok(None)` means some edit no
/// longer matches `text`, so the edits were computed from stale content.
pub fn splice(path: &str, text: &str, edits: &mut [TextEdit]) -> Result<Option<String>> {
    edits.sort_by_key(|edit| edit.start);

    for edit in edits.iter() {
        if edit.end <= edit.start {
            return Err(Error::InvalidEdit {
                path: path.to_string(),
                start: edit.start,
                end: edit.end,
            });
        }
    }
    for pair in edits.windows(2) {
        if pair[0].end > pair[1].start {
            return Err(Error::OverlappingEdits {
                path: path.to_string(),
                first_end: pair[0].end,
                second_start: pair[1].start,
            });
        }
    }
    if edits
        .iter()
        .any(|edit| text.get(edit.start..edit.end) != Some(edit.old_content.as_str()))
    {
        return Ok(None);
    }

    let mut new_text = String::with_capacity(text.len());
    let mut last_end = 0;
    for edit in edits.iter() {
        new_text.push_str(&text[last_end..edit.start]);
        new_text.push_str(&edit.new_content);
        last_end = edit.end;
    }
    new_text.push_str(&text[last_end..]);
    Ok(Some(new_text))
}

/// Rewrites `path` with the edits `compute` derives from its current text.
///
/// The text is read fresh on every attempt and handed to `compute`. When an
/// edit no longer matches the text, or the store rejects the write because the
/// file changed meanwhile, the whole cycle runs again after the retry delay,
/// until `wait.timeout` elapses. Returns whether the file was written.
pub async fn apply_edits<F, Fut>(
    store: &dyn FileStore,
    path: &str,
    wait: &ConsistencyWait,
    mut compute: F,
) -> Result<bool>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<TextEdit>>>,
{
    let deadline = Instant::now() + wait.timeout;
    loop {
        let text = store.read(path).await?;
        let mut edits = compute(text.clone()).await?;
        if edits.is_empty() {
            return Ok(false);
        }

        if let Some(new_text) = splice(path, &text, &mut edits)? {
            if new_text == text {
                return Ok(false);
            }
            match store.write(path, &text, &new_text).await {
                Ok(()) => return Ok(true),
                Err(err) if err.is_retryable() => debug!("{err}, retrying"),
                Err(err) => return Err(err),
            }
        } else {
            debug!("Edits for {path} are stale, retrying");
        }

        if Instant::now() + wait.initial_backoff > deadline {
            return Err(Error::Timeout(format!("consistent content of {path}")));
        }
        sleep(wait.initial_backoff).await;
    }
}

/// Edit replacing all of `old` with `new`, or nothing when they are equal.
pub fn whole_text_edit(old: &str, new: &str) -> Vec<TextEdit> {
    if old == new || old.is_empty() {
        return vec![];
    }
    vec![TextEdit {
        start: 0,
        end: old.len(),
        old_content: old.to_string(),
        new_content: new.to_string(),
    }]
}
