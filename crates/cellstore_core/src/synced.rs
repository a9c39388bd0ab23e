//! A cell paired with a last-update timestamp.

use crate::error::{CoreError, CoreResult};
use crate::path::{companion_path, LATEST_UPDATE};
use cellstore_codec::{CborCodec, Codec, CodecError, CodecResult};
use cellstore_storage::{Cell, CellOptions};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Lower bound for the sleep between two freshness checks.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default sleep for [`SyncedCell::get_fresh_since`].
const DEFAULT_SINCE_INTERVAL: Duration = Duration::from_millis(500);

/// Stores a UTC timestamp as 8 little-endian bytes of microseconds since
/// the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampCodec;

impl Codec<DateTime<Utc>> for TimestampCodec {
    fn encode(&self, value: &DateTime<Utc>) -> CodecResult<Vec<u8>> {
        Ok(value.timestamp_micros().to_le_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<DateTime<Utc>> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| CodecError::LengthMismatch {
            expected: 8,
            actual: bytes.len(),
        })?;
        let micros = i64::from_le_bytes(raw);
        DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| CodecError::decoding_failed(format!("timestamp {micros} out of range")))
    }
}

/// Controls how [`SyncedCell::get_fresh`] waits.
#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    /// Sleep between checks. Each method documents its own default.
    pub interval: Option<Duration>,

    /// Give up with [`CoreError::Timeout`] after this long.
    pub timeout: Option<Duration>,

    /// Give up with [`CoreError::Cancelled`] once this flag is set.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl PollOptions {
    /// Creates options that wait forever with the default interval.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval between checks.
    #[must_use]
    pub fn interval(mut self, value: Duration) -> Self {
        self.interval = Some(value);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }

    /// Sets the cancellation flag.
    #[must_use]
    pub fn cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

/// A value cell with a companion timestamp cell recording its last write.
///
/// The timestamp lives at the root path with `__LATESTUPDATE_` inserted
/// before the base name. A write stores the value first and the timestamp
/// second, so a reader that observes a fresh timestamp also observes a
/// value at least that recent.
///
/// # Example
///
/// ```rust
/// use cellstore_core::{PollOptions, SyncedCell};
/// use cellstore_storage::CellOptions;
/// use std::time::Duration;
///
/// let dir = tempfile::tempdir().unwrap();
/// let cell = SyncedCell::open(dir.path().join("quote"), CellOptions::default(), Some(0.0f64)).unwrap();
/// cell.write(&101.25).unwrap();
///
/// let price = cell.get_fresh(Duration::from_secs(60), &PollOptions::new()).unwrap();
/// assert_eq!(price, 101.25);
/// ```
pub struct SyncedCell<T> {
    value: Cell<T>,
    stamp: Cell<DateTime<Utc>>,
}

impl<T> SyncedCell<T>
where
    T: Clone + Serialize + DeserializeOwned + 'static,
{
    /// Opens a synced cell using the CBOR codec.
    ///
    /// # Errors
    ///
    /// See [`SyncedCell::with_codec`].
    pub fn open(path: impl AsRef<Path>, options: CellOptions, default: Option<T>) -> CoreResult<Self> {
        Self::with_codec(path, options, default, Arc::new(CborCodec))
    }
}

impl<T: Clone> SyncedCell<T> {
    /// Opens a synced cell with an explicit value codec.
    ///
    /// A newly created timestamp starts at [`DateTime::<Utc>::MIN_UTC`],
    /// i.e. "never updated".
    ///
    /// # Errors
    ///
    /// Returns an error if either cell cannot be opened.
    pub fn with_codec(
        path: impl AsRef<Path>,
        options: CellOptions,
        default: Option<T>,
        codec: Arc<dyn Codec<T>>,
    ) -> CoreResult<Self> {
        let path = path.as_ref();
        let value = Cell::open(path, options.clone(), default, codec)?;
        let stamp = match Cell::open(
            companion_path(path, LATEST_UPDATE),
            options,
            Some(DateTime::<Utc>::MIN_UTC),
            Arc::new(TimestampCodec),
        ) {
            Ok(stamp) => stamp,
            Err(error) => {
                value.close()?;
                return Err(error.into());
            }
        };
        Ok(Self { value, stamp })
    }

    /// Reads the value, capturing decode failures.
    ///
    /// # Errors
    ///
    /// Returns an error on access or I/O failure.
    pub fn read(&self) -> CoreResult<CodecResult<T>> {
        Ok(self.value.read()?)
    }

    /// Reads the value.
    ///
    /// # Errors
    ///
    /// Returns an error on access, I/O or decode failure.
    pub fn value(&self) -> CoreResult<T> {
        Ok(self.value.value()?)
    }

    /// Writes the value, then stamps the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if either write fails. If the value write fails the
    /// timestamp is left untouched.
    pub fn write(&self, value: &T) -> CoreResult<()> {
        self.value.write(value)?;
        self.stamp.write(&Utc::now())?;
        Ok(())
    }

    /// Returns the time of the last write.
    ///
    /// An unreadable timestamp yields [`DateTime::<Utc>::MIN_UTC`], which
    /// is never fresh.
    ///
    /// # Errors
    ///
    /// Returns an error on access or I/O failure.
    pub fn last_update_time(&self) -> CoreResult<DateTime<Utc>> {
        match self.stamp.read()? {
            Ok(time) => Ok(time),
            Err(error) => {
                debug!(path = %self.stamp.path().display(), %error, "unreadable timestamp");
                Ok(DateTime::<Utc>::MIN_UTC)
            }
        }
    }

    /// Waits until the last write is at most `max_age` old, then returns the
    /// value.
    ///
    /// The interval defaults to `max_age / 2`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Timeout`] or [`CoreError::Cancelled`] as
    /// configured in `poll`, or any read error.
    pub fn get_fresh(&self, max_age: Duration, poll: &PollOptions) -> CoreResult<T> {
        let interval = poll.interval.unwrap_or(max_age / 2);
        self.wait_until(interval, poll, |cell| {
            let age = Utc::now()
                .signed_duration_since(cell.last_update_time()?)
                .to_std()
                .unwrap_or(Duration::ZERO);
            Ok(age <= max_age)
        })
    }

    /// Waits until the last write happened at or after `earliest`, then
    /// returns the value.
    ///
    /// The interval defaults to 500 ms.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Timeout`] or [`CoreError::Cancelled`] as
    /// configured in `poll`, or any read error.
    pub fn get_fresh_since(&self, earliest: DateTime<Utc>, poll: &PollOptions) -> CoreResult<T> {
        let interval = poll.interval.unwrap_or(DEFAULT_SINCE_INTERVAL);
        self.wait_until(interval, poll, |cell| {
            Ok(cell.last_update_time()? >= earliest)
        })
    }

    fn wait_until(
        &self,
        interval: Duration,
        poll: &PollOptions,
        mut fresh: impl FnMut(&Self) -> CoreResult<bool>,
    ) -> CoreResult<T> {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let started = Instant::now();
        loop {
            if fresh(self)? {
                return self.value();
            }
            if poll.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let waited = started.elapsed();
            let sleep = match poll.timeout {
                Some(timeout) if waited >= timeout => {
                    return Err(CoreError::Timeout { waited });
                }
                Some(timeout) => interval.min(timeout - waited),
                None => interval,
            };
            trace!(path = %self.value.path().display(), ?sleep, "value not fresh yet");
            std::thread::sleep(sleep);
        }
    }
}

impl<T> SyncedCell<T> {
    /// Returns the path of the value file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.value.path()
    }

    /// Releases both cells, deleting them if `delete_on_dispose` is set.
    ///
    /// # Errors
    ///
    /// Returns the first release error.
    pub fn dispose(self) -> CoreResult<()> {
        let value = self.value.dispose();
        let stamp = self.stamp.dispose();
        value?;
        stamp?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstore_codec::{FnCodec, Utf8Codec};
    use std::fs;
    use tempfile::tempdir;

    /// UTF-8 codec that refuses to encode "poison".
    fn picky_codec() -> Arc<dyn Codec<String>> {
        Arc::new(FnCodec::new(
            |v: &String| {
                if v == "poison" {
                    Err(CodecError::encoding_failed("refused"))
                } else {
                    Utf8Codec.encode(v)
                }
            },
            |b: &[u8]| Utf8Codec.decode(b),
        ))
    }

    #[test]
    fn timestamp_layout_is_eight_bytes() {
        let time = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        let bytes = TimestampCodec.encode(&time).unwrap();
        assert_eq!(bytes, 1_700_000_000_123_456i64.to_le_bytes());
        assert_eq!(TimestampCodec.decode(&bytes).unwrap(), time);
    }

    #[test]
    fn new_cell_is_never_fresh() {
        let dir = tempdir().unwrap();
        let cell = SyncedCell::open(dir.path().join("s"), CellOptions::default(), Some(1u32)).unwrap();
        assert_eq!(cell.last_update_time().unwrap(), DateTime::<Utc>::MIN_UTC);
        assert!(dir.path().join("__LATESTUPDATE_s").exists());
    }

    #[test]
    fn write_stamps_current_time() {
        let dir = tempdir().unwrap();
        let cell = SyncedCell::open(dir.path().join("s"), CellOptions::default(), Some(1u32)).unwrap();

        let before = Utc::now();
        cell.write(&2).unwrap();
        let stamp = cell.last_update_time().unwrap();
        assert!(stamp >= before - chrono::TimeDelta::milliseconds(1));
        assert!(stamp <= Utc::now());
        assert_eq!(cell.value().unwrap(), 2);
    }

    #[test]
    fn failed_value_write_leaves_timestamp_untouched() {
        let dir = tempdir().unwrap();
        let cell = SyncedCell::with_codec(
            dir.path().join("s"),
            CellOptions::default(),
            Some("start".to_string()),
            picky_codec(),
        )
        .unwrap();

        assert!(cell.write(&"poison".to_string()).is_err());
        assert_eq!(cell.last_update_time().unwrap(), DateTime::<Utc>::MIN_UTC);
        assert_eq!(cell.value().unwrap(), "start");

        cell.write(&"fine".to_string()).unwrap();
        assert!(cell.last_update_time().unwrap() > DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn get_fresh_returns_recent_value_immediately() {
        let dir = tempdir().unwrap();
        let cell = SyncedCell::open(dir.path().join("s"), CellOptions::default(), Some(0u32)).unwrap();
        cell.write(&7).unwrap();

        let started = Instant::now();
        let value = cell
            .get_fresh(Duration::from_secs(60), &PollOptions::new().timeout(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(value, 7);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn get_fresh_times_out_on_stale_value() {
        let dir = tempdir().unwrap();
        let cell = SyncedCell::open(dir.path().join("s"), CellOptions::default(), Some(0u32)).unwrap();

        let poll = PollOptions::new()
            .interval(Duration::from_millis(5))
            .timeout(Duration::from_millis(40));
        let result = cell.get_fresh(Duration::from_secs(1), &poll);
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }

    #[test]
    fn cancelled_poll_stops() {
        let dir = tempdir().unwrap();
        let cell = SyncedCell::open(dir.path().join("s"), CellOptions::default(), Some(0u32)).unwrap();

        let flag = Arc::new(AtomicBool::new(true));
        let result = cell.get_fresh_since(Utc::now(), &PollOptions::new().cancel(flag));
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[test]
    fn corrupt_timestamp_reads_as_never() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("s");
        {
            let cell = SyncedCell::open(&root, CellOptions::default(), Some(0u32)).unwrap();
            cell.write(&1).unwrap();
        }
        fs::write(dir.path().join("__LATESTUPDATE_s"), b"bad").unwrap();

        let cell = SyncedCell::open(&root, CellOptions::default(), None::<u32>).unwrap();
        assert_eq!(cell.last_update_time().unwrap(), DateTime::<Utc>::MIN_UTC);
        assert_eq!(cell.value().unwrap(), 1);
    }

    #[test]
    fn get_fresh_since_sees_other_handle() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("shared");
        let reader = SyncedCell::open(&root, CellOptions::shared(), Some(0u64)).unwrap();
        let since = Utc::now();

        let writer_root = root.clone();
        let writer = std::thread::spawn(move || {
            let cell = SyncedCell::open(&writer_root, CellOptions::shared(), None::<u64>).unwrap();
            std::thread::sleep(Duration::from_millis(50));
            cell.write(&42).unwrap();
        });

        let poll = PollOptions::new()
            .interval(Duration::from_millis(10))
            .timeout(Duration::from_secs(10));
        assert_eq!(reader.get_fresh_since(since, &poll).unwrap(), 42);
        writer.join().unwrap();
    }

    #[test]
    fn busy_timestamp_keeps_value_file() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("s");
        SyncedCell::open(&root, CellOptions::default(), Some(5u8))
            .unwrap()
            .dispose()
            .unwrap();
        let holder = Cell::open(
            dir.path().join("__LATESTUPDATE_s"),
            CellOptions::default(),
            None,
            Arc::new(TimestampCodec),
        )
        .unwrap();

        let result = SyncedCell::<u8>::open(&root, CellOptions::new().delete_on_dispose(true), None);
        assert!(matches!(result, Err(CoreError::Storage(e)) if e.is_sharing_violation()));
        assert!(root.exists());
        holder.close().unwrap();
    }

    #[test]
    fn dispose_deletes_both_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("s");
        let cell = SyncedCell::open(&root, CellOptions::new().delete_on_dispose(true), Some(0u8)).unwrap();
        cell.write(&1).unwrap();

        cell.dispose().unwrap();
        assert!(!root.exists());
        assert!(!dir.path().join("__LATESTUPDATE_s").exists());
    }
}
