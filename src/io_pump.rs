//! Background threads that copy bytes between memory/files and a child's
//! pipe endpoint, without ever being synchronously joined by `kill` (a
//! grandchild process may still be holding the pipe open).

use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// A background copy thread plus a slot for the last I/O error it hit.
/// Cloning shares the same slot, which is how [`crate::handle::Handle::wait`]
/// and a writer/reader pair both observe the same deferred error.
pub struct Pump {
    handle: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

/// Shared output buffer filled by a capture pump, read back once the pump
/// has finished.
pub type CaptureBuf = Arc<Mutex<Vec<u8>>>;

impl Pump {
    /// Spawns a writer thread that feeds `data` into `dest`, then drops
    /// `dest` to close the child's stdin. A broken-pipe write error (the
    /// child closed its end early) is swallowed: a child that doesn't
    /// read all of its stdin before exiting is not an error condition.
    pub fn spawn_writer(data: Arc<Vec<u8>>, mut dest: File) -> Pump {
        let handle = thread::spawn(move || {
            match dest.write_all(&data) {
                Ok(()) => Ok(()),
                Err(e) if is_broken_pipe(&e) => Ok(()),
                Err(e) => Err(e),
            }
            // `dest` drops here, closing our copy of the pipe so the
            // child observes EOF on its stdin.
        });
        Pump {
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Spawns a reader thread that copies `src` to EOF into a shared
    /// buffer, returning the pump and a handle to read the buffer back
    /// once [`Pump::join`] has completed.
    pub fn spawn_capture(mut src: File) -> (Pump, CaptureBuf) {
        let buf: CaptureBuf = Arc::new(Mutex::new(Vec::new()));
        let buf_thread = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                let n = src.read(&mut chunk)?;
                if n == 0 {
                    return Ok(());
                }
                buf_thread.lock().unwrap().extend_from_slice(&chunk[..n]);
            }
        });
        (
            Pump {
                handle: Mutex::new(Some(handle)),
            },
            buf,
        )
    }

    /// Joins the thread, returning any I/O error it recorded (other than
    /// a swallowed broken pipe). Safe to call at most meaningfully once;
    /// subsequent calls return `Ok(())` since there is nothing left to
    /// join.
    pub fn join(&self) -> io::Result<()> {
        let handle = self.handle.lock().unwrap().take();
        match handle {
            Some(h) => match h.join() {
                Ok(result) => result,
                Err(_) => Err(io::Error::other("i/o pump thread panicked")),
            },
            None => Ok(()),
        }
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::BrokenPipe
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn writer_pump_delivers_all_bytes() {
        let (mut read_end, write_end) = crate::platform::pipe_pair().unwrap();
        let data = Arc::new(b"hello pump".to_vec());
        let pump = Pump::spawn_writer(data.clone(), write_end);
        let mut out = Vec::new();
        read_end.read_to_end(&mut out).unwrap();
        pump.join().unwrap();
        assert_eq!(out, *data);
    }

    #[test]
    fn capture_pump_collects_bytes() {
        let (read_end, mut write_end) = crate::platform::pipe_pair().unwrap();
        let (pump, buf) = Pump::spawn_capture(read_end);
        write_end.write_all(b"captured").unwrap();
        drop(write_end);
        pump.join().unwrap();
        assert_eq!(&buf.lock().unwrap()[..], b"captured");
    }
}
