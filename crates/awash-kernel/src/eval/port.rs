//! Ports: the dual-stream I/O attachment unit.
//!
//! A port pairs a byte stream (an OS file) with a typed value channel.
//! Ownership flags say which frame must close which side; forking a
//! port shares both sides with the flags cleared, so only the
//! originating frame ever releases a resource.
//!
//! Close must be visible across a fork tree immediately, not when the
//! last clone drops: the file and the channel sender both live behind a
//! shared `Option` that the owner takes out. Anyone still holding the
//! port afterwards sees a closed stream.

use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::value::Value;

/// Capacity of every value channel.
pub const CHAN_BUF: usize = 32;

/// The value-channel side of a port. Cloning shares the underlying
/// channel; `close` drops the sender so receivers drain to end-of-stream.
#[derive(Clone)]
pub struct Chan {
    tx: Arc<Mutex<Option<mpsc::Sender<Value>>>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Value>>>,
}

impl Chan {
    pub fn bounded(cap: usize) -> Chan {
        let (tx, rx) = mpsc::channel(cap);
        Chan {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// A channel that is already closed: receives end immediately,
    /// sends are discarded.
    pub fn closed() -> Chan {
        let ch = Chan::bounded(1);
        ch.close();
        ch
    }

    /// Send a value. Returns false if the channel is closed.
    pub async fn send(&self, v: Value) -> bool {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match tx {
            Some(tx) => tx.send(v).await.is_ok(),
            None => false,
        }
    }

    /// Receive the next value; None means the channel is closed and
    /// drained.
    pub async fn recv(&self) -> Option<Value> {
        self.rx.lock().await.recv().await
    }

    /// Close the sending side. Idempotent.
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl std::fmt::Debug for Chan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        write!(f, "Chan{{open: {open}}}")
    }
}

/// A shared file handle whose close is visible to every holder.
pub type SharedFile = Arc<Mutex<Option<File>>>;

/// The byte side of a port.
#[derive(Clone, Debug)]
pub enum PortFile {
    /// The nil file: reads fail gracefully, writes are no-ops.
    None,
    /// One of the process standard streams; never closed.
    Inherit(StdStream),
    /// A real file or pipe end.
    Handle(SharedFile),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StdStream {
    In,
    Out,
    Err,
}

impl PortFile {
    pub fn handle(f: File) -> PortFile {
        PortFile::Handle(Arc::new(Mutex::new(Some(f))))
    }

    /// Close the underlying file, if this side owns one to close.
    pub fn close(&self) {
        if let PortFile::Handle(shared) = self {
            shared.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
    }

    /// Write bytes to this stream. Writing to the nil file or to an
    /// already-closed handle is a no-op.
    pub fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            PortFile::None => Ok(()),
            PortFile::Inherit(StdStream::In) => Ok(()),
            PortFile::Inherit(StdStream::Out) => {
                let mut out = std::io::stdout().lock();
                out.write_all(bytes)?;
                out.flush()
            }
            PortFile::Inherit(StdStream::Err) => {
                let mut err = std::io::stderr().lock();
                err.write_all(bytes)?;
                err.flush()
            }
            PortFile::Handle(shared) => {
                let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                match guard.as_ref() {
                    Some(mut f) => {
                        f.write_all(bytes)?;
                        f.flush()
                    }
                    None => Ok(()),
                }
            }
        }
    }

    /// The stdio handle a child process should get for this stream.
    pub fn to_stdio(&self) -> std::process::Stdio {
        match self {
            PortFile::None => std::process::Stdio::null(),
            PortFile::Inherit(_) => std::process::Stdio::inherit(),
            PortFile::Handle(shared) => {
                let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                match guard.as_ref().and_then(|f| f.try_clone().ok()) {
                    Some(dup) => std::process::Stdio::from(dup),
                    None => std::process::Stdio::null(),
                }
            }
        }
    }
}

/// A port: byte stream plus value channel plus ownership flags.
#[derive(Clone, Debug)]
pub struct Port {
    pub file: PortFile,
    pub chan: Chan,
    pub owns_file: bool,
    pub owns_chan: bool,
}

impl Port {
    /// The nil port: no byte stream, a closed channel, nothing owned.
    pub fn nil() -> Port {
        Port {
            file: PortFile::None,
            chan: Chan::closed(),
            owns_file: false,
            owns_chan: false,
        }
    }

    /// A copy sharing both sides with the ownership flags cleared.
    pub fn fork(&self) -> Port {
        Port {
            file: self.file.clone(),
            chan: self.chan.clone(),
            owns_file: false,
            owns_chan: false,
        }
    }

    /// Release only what this port owns.
    pub fn close(&self) {
        if self.owns_file {
            self.file.close();
        }
        if self.owns_chan {
            self.chan.close();
        }
    }
}

/// Deterministic left-to-right close across a port list.
pub fn close_ports(ports: &[Port]) {
    for port in ports {
        port.close();
    }
}

/// The process-wide placeholder streams, built once per evaluator by an
/// initialization call.
#[derive(Clone, Debug)]
pub struct Sentinels {
    /// Receives end immediately; the placeholder channel input.
    pub closed_chan: Chan,
    /// A perpetual drain; the placeholder channel output.
    pub blackhole_chan: Chan,
    /// The OS null device, or the nil file if it cannot be opened.
    pub dev_null: PortFile,
    /// Null device + closed channel, nothing owned.
    pub null_port: Port,
}

/// Build the sentinels. Must be called within an async runtime: the
/// blackhole channel needs its drain task. A failure to open the null
/// device is logged and non-fatal; dependent ports become no-ops.
pub fn init_sentinels() -> Sentinels {
    let closed_chan = Chan::closed();

    let blackhole_chan = Chan::bounded(CHAN_BUF);
    let drain = blackhole_chan.clone();
    tokio::spawn(async move { while drain.recv().await.is_some() {} });

    let dev_null = match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
    {
        Ok(f) => PortFile::handle(f),
        Err(e) => {
            tracing::warn!("cannot open /dev/null, shell might not function normally: {e}");
            PortFile::None
        }
    };

    let null_port = Port {
        file: dev_null.clone(),
        chan: closed_chan.clone(),
        owns_file: false,
        owns_chan: false,
    };

    Sentinels {
        closed_chan,
        blackhole_chan,
        dev_null,
        null_port,
    }
}
