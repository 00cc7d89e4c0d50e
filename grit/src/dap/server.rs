//! Socket transport for the debug adapter
//!
//! A receive thread does the blocking reads and feeds parsed requests
//! into a shared FIFO guarded by one mutex; the condition variable is
//! notified on every enqueue and on teardown, so the drive loop never
//! blocks indefinitely.

use std::collections::VecDeque;
use std::io::{self, BufReader, BufWriter};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::protocol::{self, Request};

/// How long to wait for a client before giving up
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Shared {
    commands: VecDeque<Request>,
    quit: bool,
}

/// One accepted debug connection plus its receive thread
pub struct Server {
    shared: Arc<(Mutex<Shared>, Condvar)>,
    writer: BufWriter<TcpStream>,
    stream: TcpStream,
    receiver: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind, wait for one client and start the receive thread.
    pub fn start(addr: &str) -> io::Result<Server> {
        let listener = TcpListener::bind(addr)?;
        let stream = accept_timeout(&listener, ACCEPT_TIMEOUT)?;
        println!("connected by {}", stream.peer_addr()?);

        let shared: Arc<(Mutex<Shared>, Condvar)> = Arc::default();
        let reader_stream = stream.try_clone()?;
        let thread_shared = Arc::clone(&shared);

        let receiver = thread::spawn(move || {
            let mut reader = BufReader::new(reader_stream);
            loop {
                match protocol::read_message(&mut reader) {
                    Ok(Some(request)) => {
                        let (lock, condvar) = &*thread_shared;
                        let mut shared = lock.lock().unwrap_or_else(|e| e.into_inner());
                        shared.commands.push_back(request);
                        condvar.notify_all();
                    }
                    // EOF or a broken connection both end the session
                    Ok(None) | Err(_) => {
                        let (lock, condvar) = &*thread_shared;
                        let mut shared = lock.lock().unwrap_or_else(|e| e.into_inner());
                        shared.quit = true;
                        condvar.notify_all();
                        break;
                    }
                }
            }
        });

        Ok(Server {
            shared,
            writer: BufWriter::new(stream.try_clone()?),
            stream,
            receiver: Some(receiver),
        })
    }

    /// Pop the oldest queued request, if any.
    pub fn take_command(&self) -> Option<Request> {
        let (lock, _) = &*self.shared;
        let mut shared = lock.lock().unwrap_or_else(|e| e.into_inner());
        shared.commands.pop_front()
    }

    pub fn quitting(&self) -> bool {
        let (lock, _) = &*self.shared;
        lock.lock().unwrap_or_else(|e| e.into_inner()).quit
    }

    pub fn request_quit(&self) {
        let (lock, condvar) = &*self.shared;
        lock.lock().unwrap_or_else(|e| e.into_inner()).quit = true;
        condvar.notify_all();
    }

    /// Block until a command arrives, teardown is signalled, or the
    /// timeout elapses. Spurious wakeups are fine; the caller loops.
    pub fn wait(&self, timeout: Duration) {
        let (lock, condvar) = &*self.shared;
        let shared = lock.lock().unwrap_or_else(|e| e.into_inner());
        if shared.quit || !shared.commands.is_empty() {
            return;
        }
        let _ = condvar.wait_timeout(shared, timeout);
    }

    /// Send one framed message; transport failures end the session.
    pub fn send(&mut self, payload: &impl Serialize) {
        if let Err(e) = protocol::write_message(&mut self.writer, payload) {
            eprintln!("send failed: {e}");
            self.request_quit();
        }
    }

    /// Tear down the connection and join the receive thread.
    pub fn stop(mut self) {
        self.request_quit();
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}

/// Poll a non-blocking accept until a client shows up or the window
/// closes.
fn accept_timeout(listener: &TcpListener, timeout: Duration) -> io::Result<TcpStream> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + timeout;

    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no client connected",
                    ));
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(e),
        }
    }
}
