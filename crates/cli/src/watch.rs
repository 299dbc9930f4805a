// File-backed source cells and the polling loop behind `cellwork watch`.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, SystemTime};

use cellwork_engine::{ComputeError, Reactive, Value, ValueSource};

/// A source cell whose value is the text of a file.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    /// Modification time and length seen at the last poll.
    seen: Cell<Option<(SystemTime, u64)>>,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        let seen = Cell::new(signature(&path));
        Self { path, seen }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file changed since the last call (or construction).
    pub fn poll_changed(&self) -> bool {
        let current = signature(&self.path);
        let changed = current != self.seen.get();
        self.seen.set(current);
        changed
    }
}

impl ValueSource for FileSource {
    fn read(&self) -> Result<Value, ComputeError> {
        log::trace!("reading {}", self.path.display());
        fs::read_to_string(&self.path)
            .map(Value::Text)
            .map_err(|e| ComputeError::new(format!("cannot read {}: {}", self.path.display(), e)))
    }
}

fn signature(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Poll `sources` every `interval`, invalidating changed ones and calling
/// `on_update` after each batch of changes. Returns after `max_updates`
/// batches, or never if `None`.
pub fn run(
    env: &mut Reactive,
    sources: &[(String, Rc<FileSource>)],
    interval: Duration,
    max_updates: Option<usize>,
    mut on_update: impl FnMut(&mut Reactive),
) {
    let mut updates = 0;
    while max_updates.map_or(true, |max| updates < max) {
        thread::sleep(interval);

        let mut changed = false;
        for (name, source) in sources {
            if !source.poll_changed() {
                continue;
            }
            log::info!("{} changed ({})", name, source.path().display());
            changed = true;
            // The cell exists (it was installed with the model), so only an
            // eager recompute can fail here; the reprint reports that.
            if let Err(e) = env.invalidate(name) {
                log::warn!("recompute after change to {} failed: {}", name, e);
            }
        }

        if changed {
            updates += 1;
            on_update(env);
        }
    }
}
