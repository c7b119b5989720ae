//! The reactor: binds the listener, owns the connection table, dispatches readiness events to
//! the worker pool, and drives the timer heap.

use std::io::{self, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slab::Slab;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::connection::{self, Connection};
use crate::error::ServerError;
use crate::pool::{DbPool, WorkerPool};
use crate::poller::{Interest, Poller};
use crate::resource::Resources;
use crate::task::{ConnId, Task};
use crate::timer::TimerHeap;

const LISTENER_TOKEN: u64 = u64::MAX;
const WAKE_TOKEN: u64 = u64::MAX - 1;

/// The connection table maps a slab id to its own mutex, not one mutex over the whole slab: a
/// worker locks the table only long enough to clone the `Arc` for the one connection its task
/// names, then locks that connection alone for the rest of the task. Locking the whole table for
/// a task's duration would serialize every worker onto a single mutex through a synchronous
/// MySQL round-trip in `auth.rs`, and would stall the reactor's own `accept_all`/`rearm`/
/// `close_entry` behind whichever worker is mid-query.
type Table = Arc<Mutex<Slab<Arc<Mutex<Connection>>>>>;

/// What a worker asks the reactor to do once its task has run. Workers never touch the
/// multiplexer or the timer heap directly; they report back over this channel instead.
enum Completion {
    RearmRead(ConnId),
    RearmWrite(ConnId),
    Closed(ConnId),
}

/// A cheap, `Send + Sync` handle external code (a `Ctrl+C` handler, a test harness) can use to
/// ask the reactor to stop accepting and drain.
#[derive(Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    wake_fd: RawFd,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        wake(self.wake_fd);
    }
}

pub struct Server {
    poller: Arc<Poller>,
    listener: StdTcpListener,
    timers: TimerHeap,
    workers: Option<WorkerPool>,
    db: DbPool,
    connections: Table,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    wake_fd: RawFd,
    config: Config,
    user_count: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        let listener = bind_listener(&config)?;
        let poller = Poller::new().map_err(ServerError::Poller)?;
        poller
            .add(
                listener.as_raw_fd(),
                LISTENER_TOKEN,
                Interest::READ | Interest::RDHUP | config.trig_mode.listener_interest(),
            )
            .map_err(ServerError::Poller)?;

        let wake_fd = create_wake_fd().map_err(ServerError::Poller)?;
        poller
            .add(wake_fd, WAKE_TOKEN, Interest::READ)
            .map_err(ServerError::Poller)?;

        let db = DbPool::init(
            &config.sql_host,
            config.sql_port,
            &config.sql_user,
            &config.sql_pwd,
            &config.sql_db,
            config.conn_pool_num,
        );

        let (completions_tx, completions_rx) = mpsc::channel();

        Ok(Self {
            poller: Arc::new(poller),
            listener,
            timers: TimerHeap::new(),
            workers: None,
            db,
            connections: Arc::new(Mutex::new(Slab::new())),
            completions_tx,
            completions_rx,
            wake_fd,
            config,
            user_count: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: Arc::clone(&self.running),
            wake_fd: self.wake_fd,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the worker pool with a task handler closed over this server's shared state; done
    /// here rather than in `bind` since the handler needs `Arc`s that don't exist until `bind`
    /// has finished constructing `self`.
    fn spawn_workers(&mut self) {
        let connections = Arc::clone(&self.connections);
        let db = self.db.clone();
        let completions_tx = self.completions_tx.clone();
        let wake_fd = self.wake_fd;

        self.workers = Some(WorkerPool::new(self.config.thread_num, move |task| {
            run_task(&connections, &db, task, &completions_tx);
            wake(wake_fd);
        }));
    }

    pub fn run(&mut self) -> io::Result<()> {
        self.spawn_workers();
        let resources = Resources::new(self.config.resource_dir.clone());
        let mut events = Vec::with_capacity(1024);

        info!(port = self.config.port, "reactor listening");

        while self.running.load(Ordering::SeqCst) {
            let timeout = self.timers.next_tick();
            self.poller.wait(&mut events, timeout)?;

            for event in &events {
                match event.token() {
                    LISTENER_TOKEN => self.accept_all(&resources),
                    WAKE_TOKEN => {
                        drain_wake_fd(self.wake_fd);
                        self.drain_completions();
                    }
                    token => self.dispatch(token as ConnId, event),
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn accept_all(&mut self, resources: &Resources) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if self.user_count.load(Ordering::Relaxed) >= self.config.max_connections {
                        warn!(peer = %peer_addr, "connection capacity reached");
                        let _ = (&stream).write_all(b"Server busy!");
                        continue;
                    }

                    let conn = match Connection::init(
                        stream,
                        peer_addr,
                        resources.clone(),
                        Arc::clone(&self.user_count),
                    ) {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "failed to initialize accepted connection");
                            continue;
                        }
                    };
                    let fd = conn.as_raw_fd();
                    let id = self
                        .connections
                        .lock()
                        .unwrap()
                        .insert(Arc::new(Mutex::new(conn)));

                    let interest = Interest::READ
                        | Interest::RDHUP
                        | Interest::ONESHOT
                        | self.config.trig_mode.connection_interest();
                    if let Err(e) = self.poller.add(fd, id as u64, interest) {
                        warn!(error = %e, "failed to register accepted connection");
                        self.connections.lock().unwrap().try_remove(id);
                        continue;
                    }

                    if self.config.idle_timeout_ms > 0 {
                        self.arm_timeout(id);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn arm_timeout(&mut self, id: ConnId) {
        let connections = Arc::clone(&self.connections);
        let poller = Arc::clone(&self.poller);
        let user_count = Arc::clone(&self.user_count);
        let timeout = Duration::from_millis(self.config.idle_timeout_ms);
        self.timers.add(id, timeout, move |id| {
            info!(conn = id, "idle timeout; closing connection");
            close_entry(&connections, &poller, &user_count, id);
        });
    }

    fn dispatch(&mut self, id: ConnId, event: &crate::poller::Event) {
        if event.error() || event.read_closed() {
            self.close(id);
            return;
        }

        if self.config.idle_timeout_ms > 0 {
            self.timers
                .adjust(id, Duration::from_millis(self.config.idle_timeout_ms));
        }

        if event.readable() {
            self.workers.as_ref().unwrap().submit(Task::OnRead(id));
        } else if event.writable() {
            self.workers.as_ref().unwrap().submit(Task::OnWrite(id));
        } else {
            warn!(conn = id, "unexpected readiness mask");
        }
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            match completion {
                Completion::RearmRead(id) => self.rearm(id, Interest::READ),
                Completion::RearmWrite(id) => self.rearm(id, Interest::WRITE),
                Completion::Closed(id) => self.close(id),
            }
        }
    }

    fn rearm(&mut self, id: ConnId, base: Interest) {
        let conn_handle = {
            let table = self.connections.lock().unwrap();
            let Some(conn) = table.get(id) else { return };
            Arc::clone(conn)
        };
        let fd = conn_handle.lock().unwrap().as_raw_fd();
        let interest = base | Interest::RDHUP | Interest::ONESHOT | self.config.trig_mode.connection_interest();
        if let Err(e) = self.poller.modify(fd, id as u64, interest) {
            warn!(conn = id, error = %e, "failed to rearm connection");
        }
    }

    fn close(&mut self, id: ConnId) {
        self.timers.cancel(id);
        close_entry(&self.connections, &self.poller, &self.user_count, id);
    }

    fn shutdown(&mut self) {
        info!("reactor shutting down");
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
        self.db.close();
        let _ = unsafe { libc::close(self.wake_fd) };
    }
}

fn run_task(connections: &Table, db: &DbPool, task: Task, completions_tx: &Sender<Completion>) {
    let id = match task {
        Task::OnRead(id) => id,
        Task::OnWrite(id) => id,
    };

    let conn_handle = {
        let table = connections.lock().unwrap();
        let Some(conn) = table.get(id) else {
            return;
        };
        Arc::clone(conn)
    };

    // The table lock is already released here: this task now only contends with another task
    // for this same connection (impossible under `ONESHOT`) and with the reactor's own
    // `rearm`/`close_entry`, never with a worker handling a different connection.
    let mut conn = conn_handle.lock().unwrap();
    let outcome = match task {
        Task::OnRead(id) => run_read(id, &mut *conn, db),
        Task::OnWrite(id) => run_write(id, &mut *conn),
    };
    drop(conn);

    let _ = completions_tx.send(outcome);
}

fn run_read(id: ConnId, conn: &mut Connection, db: &DbPool) -> Completion {
    loop {
        match conn.read() {
            Ok(0) => return Completion::Closed(id),
            Ok(_) => continue,
            Err(e) if connection::would_block(&e) => break,
            Err(e) => {
                warn!(error = %e, "connection read failed");
                return Completion::Closed(id);
            }
        }
    }

    let handled = conn.process(db);
    if handled && conn.to_write_bytes() > 0 {
        Completion::RearmWrite(id)
    } else if handled && !conn.is_keep_alive() {
        Completion::Closed(id)
    } else {
        Completion::RearmRead(id)
    }
}

fn run_write(id: ConnId, conn: &mut Connection) -> Completion {
    loop {
        if conn.to_write_bytes() == 0 {
            break;
        }
        match conn.write() {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) if connection::would_block(&e) => {
                return Completion::RearmWrite(id);
            }
            Err(e) => {
                warn!(error = %e, "connection write failed");
                return Completion::Closed(id);
            }
        }
    }

    if conn.is_keep_alive() {
        Completion::RearmRead(id)
    } else {
        Completion::Closed(id)
    }
}

fn close_entry(connections: &Table, poller: &Poller, user_count: &Arc<AtomicUsize>, id: ConnId) {
    let removed = connections.lock().unwrap().try_remove(id);
    if let Some(conn_handle) = removed {
        let mut conn = conn_handle.lock().unwrap();
        let _ = poller.remove(conn.as_raw_fd());
        conn.close();
    }
    let _ = user_count;
}

fn bind_listener(config: &Config) -> Result<StdTcpListener, ServerError> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .expect("well-formed bind address");

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0) };
    if fd < 0 {
        return Err(ServerError::SocketSetup(io::Error::last_os_error()));
    }

    let reuse: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let linger = libc::linger {
        l_onoff: i32::from(config.opt_linger),
        l_linger: 1,
    };
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        );
    }

    let sockaddr = socket_addr_to_raw(addr);
    let bind_ret = unsafe {
        libc::bind(
            fd,
            &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if bind_ret < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(ServerError::SocketSetup(err));
    }

    if unsafe { libc::listen(fd, 6) } < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(ServerError::SocketSetup(err));
    }

    // SAFETY: fd is a bound, listening, non-blocking socket this function just created and owns
    // exclusively up to this point.
    Ok(unsafe { StdTcpListener::from_raw_fd(fd) })
}

fn socket_addr_to_raw(addr: SocketAddr) -> libc::sockaddr_in {
    match addr {
        SocketAddr::V4(v4) => libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: v4.port().to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            },
            sin_zero: [0; 8],
        },
        SocketAddr::V6(_) => unreachable!("IPv6 is out of scope"),
    }
}

fn create_wake_fd() -> io::Result<RawFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn wake(fd: RawFd) {
    let one: u64 = 1;
    unsafe {
        libc::write(fd, &one as *const u64 as *const libc::c_void, 8);
    }
}

fn drain_wake_fd(fd: RawFd) {
    let mut buf = [0u8; 8];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
        if n <= 0 {
            break;
        }
    }
}
