//! One libpcap capture file.

use crate::dump::template::NameTemplate;
use crate::dump::{CaptureParams, CloseHook, PacketSink, RecordMeta};
use crate::error::{MonitorError, MonitorResult};
use chrono::{DateTime, Local};
use byteorder_slice::NativeEndian;
use pcap_file::pcap::{PcapHeader, PcapPacket};
use pcap_file::{DataLink, Endianness, TsResolution};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Highest numeric suffix tried when the rendered name already exists.
const MAX_NAME_SUFFIX: u32 = 10_000;

/// Writer for a single capture file.
///
/// The file is created (never truncated) when the writer is constructed and
/// the pcap global header is written immediately. If the rendered name is
/// taken, `-1`, `-2`, … is inserted before the extension.
///
/// Headers and records are written in host byte order with microsecond
/// timestamps, the same layout libpcap itself produces.
pub struct CaptureFile {
    path:       PathBuf,
    params:     CaptureParams,
    writer:     Option<BufWriter<File>>,
    close_hook: Option<CloseHook>,
}

impl CaptureFile {
    /// Opens a new file named by rendering `template` against the current time.
    pub fn create(template: &NameTemplate, params: CaptureParams) -> MonitorResult<Self> {
        Self::create_at(template, params, Local::now())
    }

    /// Opens a new file named by rendering `template` against `now`.
    pub fn create_at(
        template: &NameTemplate,
        params:   CaptureParams,
        now:      DateTime<Local>,
    ) -> MonitorResult<Self> {
        Self::open(template.render(&now)?, params)
    }

    /// Opens a new file at `path`, or at the first free suffixed variant of it.
    pub fn open(path: impl Into<PathBuf>, params: CaptureParams) -> MonitorResult<Self> {
        let (path, file) = create_unique(path.into())?;

        let header = PcapHeader {
            snaplen:       params.snaplen,
            datalink:      DataLink::from(params.linktype),
            ts_resolution: TsResolution::MicroSecond,
            endianness:    Endianness::native(),
            ..PcapHeader::default()
        };
        let mut writer = BufWriter::new(file);
        header
            .write_to(&mut writer)
            .map_err(|source| MonitorError::WriteFile {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            params,
            writer: Some(writer),
            close_hook: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    fn writer_mut(&mut self) -> MonitorResult<&mut BufWriter<File>> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(MonitorError::AlreadyClosed {
                path: self.path.clone(),
            }),
        }
    }
}

impl PacketSink for CaptureFile {
    fn write(&mut self, meta: RecordMeta, data: &[u8]) -> MonitorResult<()> {
        // Records never exceed the snap length announced in the header.
        let keep = data.len().min(self.params.snaplen as usize);
        let packet = PcapPacket::new(meta.timestamp, meta.orig_len, &data[..keep]);

        let snaplen = self.params.snaplen;
        let path = self.path.clone();
        packet
            .write_to::<_, NativeEndian>(self.writer_mut()?, TsResolution::MicroSecond, snaplen)
            .map_err(|source| MonitorError::WriteFile { path, source })?;
        Ok(())
    }

    fn flush(&mut self) -> MonitorResult<()> {
        let path = self.path.clone();
        self.writer_mut()?
            .flush()
            .map_err(|source| MonitorError::FlushFile { path, source })
    }

    fn close(&mut self) -> MonitorResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        let file = writer
            .into_inner()
            .map_err(|e| MonitorError::FlushFile {
                path:   self.path.clone(),
                source: e.into_error(),
            })?;
        file.sync_all().map_err(|source| MonitorError::CloseFile {
            path: self.path.clone(),
            source,
        })?;
        drop(file);

        if let Some(hook) = &self.close_hook {
            hook(&self.path);
        }
        Ok(())
    }

    fn set_close_hook(&mut self, hook: CloseHook) {
        self.close_hook = Some(hook);
    }
}

/// Creates `path` exclusively, falling back to `stem-N.ext` while it exists.
fn create_unique(path: PathBuf) -> MonitorResult<(PathBuf, File)> {
    let mut candidate = path.clone();
    for n in 1..=MAX_NAME_SUFFIX {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                candidate = suffixed(&path, n);
            }
            Err(source) => {
                return Err(MonitorError::CreateFile {
                    path: candidate,
                    source,
                })
            }
        }
    }
    Err(MonitorError::CreateFile {
        path,
        source: io::Error::new(ErrorKind::AlreadyExists, "no free file name"),
    })
}

fn suffixed(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}-{}", stem, n),
    };
    path.with_file_name(name)
}

/// Reads back every record of a capture file as (timestamp, orig_len, data).
///
/// Uses raw records because `PcapReader::next_packet` rejects records whose
/// original length exceeds the snap length, which is what truncation produces.
#[cfg(test)]
pub(crate) fn read_records(
    path: &Path,
) -> (PcapHeader, Vec<(std::time::Duration, u32, Vec<u8>)>) {
    let mut reader = pcap_file::pcap::PcapReader::new(File::open(path).unwrap()).unwrap();
    let header = reader.header();
    assert_eq!(header.ts_resolution, TsResolution::MicroSecond);
    let mut records = Vec::new();
    while let Some(raw) = reader.next_raw_packet() {
        let raw = raw.unwrap();
        assert_eq!(raw.incl_len as usize, raw.data.len());
        let timestamp =
            std::time::Duration::new(u64::from(raw.ts_sec), raw.ts_frac * 1000);
        records.push((timestamp, raw.orig_len, raw.data.into_owned()));
    }
    (header, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::parsers::linktype;
    use crate::monitor::parsers::testing::*;
    use std::sync::{Arc, Mutex};

    const PARAMS: CaptureParams = CaptureParams {
        snaplen:  1600,
        linktype: linktype::ETHERNET,
    };

    fn recording_hook() -> (CloseHook, Arc<Mutex<Vec<PathBuf>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: CloseHook = Arc::new(move |p: &Path| sink.lock().unwrap().push(p.to_path_buf()));
        (hook, seen)
    }

    #[test]
    fn test_write_close_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.pcap");

        let mut file = CaptureFile::open(&path, PARAMS).unwrap();
        let a = client(NONE, b"first");
        let b = server(FIN, b"second");
        file.write_packet(&a).unwrap();
        file.write_packet(&b).unwrap();
        file.close().unwrap();

        let (header, records) = read_records(&path);
        assert_eq!(header.snaplen, 1600);
        assert_eq!(header.datalink, DataLink::ETHERNET);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].2, a.data);
        assert_eq!(records[1].2, b.data);
        assert_eq!(records[0].0, a.timestamp);
        assert_eq!(records[1].1, b.orig_len);
    }

    #[test]
    fn test_records_are_truncated_to_snaplen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.pcap");
        let params = CaptureParams { snaplen: 20, ..PARAMS };

        let mut file = CaptureFile::open(&path, params).unwrap();
        let pkt = client(NONE, b"a payload longer than twenty bytes");
        file.write_packet(&pkt).unwrap();
        file.close().unwrap();

        let (_, records) = read_records(&path);
        assert_eq!(records[0].1, pkt.orig_len);
        assert_eq!(records[0].2, pkt.data[..20].to_vec());
    }

    #[test]
    fn test_flush_makes_records_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flushed.pcap");

        let mut file = CaptureFile::open(&path, PARAMS).unwrap();
        file.write_packet(&client(NONE, b"x")).unwrap();
        file.flush().unwrap();

        let (_, records) = read_records(&path);
        assert_eq!(records.len(), 1);
        file.close().unwrap();
    }

    #[test]
    fn test_close_hook_fires_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hooked.pcap");
        let (hook, seen) = recording_hook();

        let mut file = CaptureFile::open(&path, PARAMS).unwrap();
        file.set_close_hook(hook);
        file.write_packet(&client(NONE, b"x")).unwrap();
        file.close().unwrap();
        file.close().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![path.clone()]);
        assert!(file.is_closed());
    }

    #[test]
    fn test_double_close_leaves_other_files_intact() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = CaptureFile::open(dir.path().join("a.pcap"), PARAMS).unwrap();
        let mut second = CaptureFile::open(dir.path().join("b.pcap"), PARAMS).unwrap();

        first.write_packet(&client(NONE, b"a")).unwrap();
        second.write_packet(&client(NONE, b"b")).unwrap();
        first.close().unwrap();
        first.close().unwrap();
        second.write_packet(&client(NONE, b"c")).unwrap();
        second.close().unwrap();

        assert_eq!(read_records(&dir.path().join("a.pcap")).1.len(), 1);
        assert_eq!(read_records(&dir.path().join("b.pcap")).1.len(), 2);
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = CaptureFile::open(dir.path().join("c.pcap"), PARAMS).unwrap();
        file.close().unwrap();

        let err = file.write_packet(&client(NONE, b"x")).unwrap_err();
        assert!(matches!(err, MonitorError::AlreadyClosed { .. }));
    }

    #[test]
    fn test_existing_name_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.pcap");
        std::fs::write(&path, b"keep me").unwrap();

        let mut file = CaptureFile::open(&path, PARAMS).unwrap();
        assert_eq!(file.path(), dir.path().join("dup-1.pcap"));
        file.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/x.pcap");
        let err = CaptureFile::open(&path, PARAMS).err().unwrap();
        assert!(matches!(err, MonitorError::CreateFile { .. }));
    }
}
