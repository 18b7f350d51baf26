//! Embedded replicated-store server.
//!
//! Every agent runs one: the master accepts writes, every other node runs
//! a read-only replica slaved to it. The server speaks enough of the RESP2
//! wire for stock clients — `GET`/`SET`, the set commands backing the
//! plain-remote registry list, and `SLAVEOF` for replica attachment.
//!
//! ## Replication
//!
//! `SLAVEOF <host> <port>` starts a background task that polls the master
//! with plain read commands (`KEYS`, `TYPE`, `GET`, `SMEMBERS`) and swaps
//! the fetched state in wholesale. `SLAVEOF NO ONE` detaches. Client
//! writes against a read-only replica are rejected; replication applies
//! state directly and bypasses the guard.
//!
//! ## Persistence
//!
//! State is persisted as JSON under the node's data directory on every
//! mutation, using the temp-file + rename pattern so a crash never leaves
//! a torn state file.

use crate::constants::{REPLICATION_INTERVAL, STORE_STATE_FILE};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A stored value: plain string or set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
enum Entry {
    Str(String),
    Set(BTreeSet<String>),
}

/// State shared between connections and the replication task.
struct Shared {
    data: RwLock<HashMap<String, Entry>>,
    readonly: bool,
    state_path: PathBuf,
    replication: Mutex<Option<JoinHandle<()>>>,
}

/// The embedded store server.
///
/// Owned exclusively by the agent: started at agent startup, closed at
/// shutdown. The store is unaware of the agent.
pub struct StoreServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl StoreServer {
    /// Binds the listener, loads persisted state, and starts serving.
    pub async fn start(addr: SocketAddr, data_dir: PathBuf, readonly: bool) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let state_path = data_dir.join(STORE_STATE_FILE);
        let data = load_state(&state_path);

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(store = %local_addr, readonly, "serving store");

        let shared = Arc::new(Shared {
            data: RwLock::new(data),
            readonly,
            state_path,
            replication: Mutex::new(None),
        });
        let (shutdown, mut closed) = watch::channel(false);

        let accept_shared = shared.clone();
        let accept = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(a) => a,
                            Err(e) => {
                                warn!("store accept failed: {}", e);
                                continue;
                            }
                        };
                        debug!(%peer, "store connection");
                        let shared = accept_shared.clone();
                        let closed = closed.clone();
                        tokio::spawn(serve_connection(shared, stream, closed));
                    }
                    _ = closed.changed() => return,
                }
            }
        });

        Ok(Self {
            shared,
            local_addr,
            accept,
            shutdown,
        })
    }

    /// The bound listen address (resolves port 0 to the real port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the listener, open connections, and any replication task.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.accept.abort();
        if let Ok(mut replication) = self.shared.replication.lock() {
            if let Some(task) = replication.take() {
                task.abort();
            }
        }
    }
}

impl Drop for StoreServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn load_state(path: &PathBuf) -> HashMap<String, Entry> {
    match std::fs::read(path) {
        Ok(data) => match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(e) => {
                warn!("discarding unreadable store state: {}", e);
                HashMap::new()
            }
        },
        Err(_) => HashMap::new(),
    }
}

impl Shared {
    /// Persists the current state. Best effort: replica state is
    /// reconstructible from the master.
    fn save(&self) {
        let data = match self.data.read() {
            Ok(d) => match serde_json::to_vec(&*d) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("encode store state: {}", e);
                    return;
                }
            },
            Err(_) => return,
        };
        let tmp = self.state_path.with_extension("json.tmp");
        if let Err(e) =
            std::fs::write(&tmp, &data).and_then(|_| std::fs::rename(&tmp, &self.state_path))
        {
            error!("persist store state: {}", e);
        }
    }

    /// Swaps in a full state fetched from the master.
    fn replace(&self, next: HashMap<String, Entry>) {
        if let Ok(mut data) = self.data.write() {
            *data = next;
        }
        self.save();
    }
}

// =============================================================================
// Wire Protocol
// =============================================================================

/// A RESP2 reply.
enum Reply {
    Simple(&'static str),
    Error(String),
    Int(i64),
    Bulk(Option<String>),
    Array(Vec<String>),
}

impl Reply {
    fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Simple(s) => format!("+{}\r\n", s).into_bytes(),
            Reply::Error(e) => format!("-{}\r\n", e).into_bytes(),
            Reply::Int(n) => format!(":{}\r\n", n).into_bytes(),
            Reply::Bulk(None) => b"$-1\r\n".to_vec(),
            Reply::Bulk(Some(s)) => format!("${}\r\n{}\r\n", s.len(), s).into_bytes(),
            Reply::Array(items) => {
                let mut out = format!("*{}\r\n", items.len()).into_bytes();
                for item in items {
                    out.extend(format!("${}\r\n{}\r\n", item.len(), item).into_bytes());
                }
                out
            }
        }
    }
}

async fn serve_connection(shared: Arc<Shared>, stream: TcpStream, mut closed: watch::Receiver<bool>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let command = tokio::select! {
            c = read_command(&mut reader) => c,
            _ = closed.changed() => return,
        };
        let args = match command {
            Ok(Some(args)) => args,
            Ok(None) => return,
            Err(e) => {
                debug!("store connection closed: {}", e);
                return;
            }
        };
        let quit = args
            .first()
            .map(|c| c.eq_ignore_ascii_case("QUIT"))
            .unwrap_or(false);
        let reply = execute(&shared, args);
        if write.write_all(&reply.encode()).await.is_err() || quit {
            return;
        }
    }
}

/// Reads one RESP2 array-of-bulk-strings command. `None` on clean EOF.
async fn read_command(
    reader: &mut BufReader<OwnedReadHalf>,
) -> std::io::Result<Option<Vec<String>>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let line = line.trim_end();
    let count: usize = match line.strip_prefix('*') {
        Some(n) => n
            .parse()
            .map_err(|_| std::io::Error::other("bad array header"))?,
        None => return Err(std::io::Error::other("expected array header")),
    };
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 {
            return Ok(None);
        }
        let len: usize = header
            .trim_end()
            .strip_prefix('$')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| std::io::Error::other("bad bulk header"))?;
        let mut payload = vec![0u8; len + 2];
        reader.read_exact(&mut payload).await?;
        payload.truncate(len);
        let arg = String::from_utf8(payload)
            .map_err(|_| std::io::Error::other("non-utf8 argument"))?;
        args.push(arg);
    }
    Ok(Some(args))
}

fn execute(shared: &Arc<Shared>, mut args: Vec<String>) -> Reply {
    if args.is_empty() {
        return Reply::Error("ERR empty command".to_string());
    }
    let command = args.remove(0).to_ascii_uppercase();
    match command.as_str() {
        "PING" => Reply::Simple("PONG"),
        "ECHO" => Reply::Bulk(args.into_iter().next()),
        // accepted for client compatibility; single-database store
        "SELECT" | "CLIENT" | "COMMAND" | "QUIT" => Reply::Simple("OK"),
        "GET" => with_key(args, |key| {
            let data = read_guard(shared);
            match data.get(&key) {
                Some(Entry::Str(v)) => Reply::Bulk(Some(v.clone())),
                Some(Entry::Set(_)) => wrong_type(),
                None => Reply::Bulk(None),
            }
        }),
        "SET" => {
            if args.len() < 2 {
                return wrong_args("set");
            }
            if shared.readonly {
                return readonly_error();
            }
            let value = args.remove(1);
            let key = args.remove(0);
            if let Ok(mut data) = shared.data.write() {
                data.insert(key, Entry::Str(value));
            }
            shared.save();
            Reply::Simple("OK")
        }
        "DEL" => {
            if shared.readonly {
                return readonly_error();
            }
            let mut removed = 0;
            if let Ok(mut data) = shared.data.write() {
                for key in &args {
                    if data.remove(key).is_some() {
                        removed += 1;
                    }
                }
            }
            shared.save();
            Reply::Int(removed)
        }
        "SADD" => {
            if args.len() < 2 {
                return wrong_args("sadd");
            }
            if shared.readonly {
                return readonly_error();
            }
            let key = args.remove(0);
            let mut added = 0;
            if let Ok(mut data) = shared.data.write() {
                let entry = data.entry(key).or_insert_with(|| Entry::Set(BTreeSet::new()));
                match entry {
                    Entry::Set(set) => {
                        for member in args {
                            if set.insert(member) {
                                added += 1;
                            }
                        }
                    }
                    Entry::Str(_) => return wrong_type(),
                }
            }
            shared.save();
            Reply::Int(added)
        }
        "SREM" => {
            if args.len() < 2 {
                return wrong_args("srem");
            }
            if shared.readonly {
                return readonly_error();
            }
            let key = args.remove(0);
            let mut removed = 0;
            if let Ok(mut data) = shared.data.write() {
                if let Some(Entry::Set(set)) = data.get_mut(&key) {
                    for member in &args {
                        if set.remove(member) {
                            removed += 1;
                        }
                    }
                }
            }
            shared.save();
            Reply::Int(removed)
        }
        "SISMEMBER" => {
            if args.len() != 2 {
                return wrong_args("sismember");
            }
            let data = read_guard(shared);
            match data.get(&args[0]) {
                Some(Entry::Set(set)) => Reply::Int(i64::from(set.contains(&args[1]))),
                Some(Entry::Str(_)) => wrong_type(),
                None => Reply::Int(0),
            }
        }
        "SMEMBERS" => with_key(args, |key| {
            let data = read_guard(shared);
            match data.get(&key) {
                Some(Entry::Set(set)) => Reply::Array(set.iter().cloned().collect()),
                Some(Entry::Str(_)) => wrong_type(),
                None => Reply::Array(Vec::new()),
            }
        }),
        "KEYS" => with_key(args, |pattern| {
            let data = read_guard(shared);
            let mut keys: Vec<String> = data
                .keys()
                .filter(|k| matches_pattern(&pattern, k))
                .cloned()
                .collect();
            keys.sort();
            Reply::Array(keys)
        }),
        "TYPE" => with_key(args, |key| {
            let data = read_guard(shared);
            Reply::Simple(match data.get(&key) {
                Some(Entry::Str(_)) => "string",
                Some(Entry::Set(_)) => "set",
                None => "none",
            })
        }),
        "SLAVEOF" => {
            if args.len() != 2 {
                return wrong_args("slaveof");
            }
            if args[0].eq_ignore_ascii_case("no") {
                detach(shared);
            } else {
                attach(shared, format!("{}:{}", args[0], args[1]));
            }
            Reply::Simple("OK")
        }
        _ => Reply::Error(format!("ERR unknown command '{}'", command)),
    }
}

fn with_key(mut args: Vec<String>, f: impl FnOnce(String) -> Reply) -> Reply {
    if args.len() != 1 {
        return Reply::Error("ERR wrong number of arguments".to_string());
    }
    f(args.remove(0))
}

fn read_guard<'a>(
    shared: &'a Arc<Shared>,
) -> std::sync::RwLockReadGuard<'a, HashMap<String, Entry>> {
    // a poisoned lock means a panicked writer; readers take the data as-is
    match shared.data.read() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn readonly_error() -> Reply {
    Reply::Error("READONLY You can't write against a read only replica.".to_string())
}

fn wrong_type() -> Reply {
    Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".to_string())
}

fn wrong_args(cmd: &str) -> Reply {
    Reply::Error(format!("ERR wrong number of arguments for '{}'", cmd))
}

/// Minimal glob: `*` matches everything, a trailing `*` matches a prefix,
/// anything else matches exactly.
fn matches_pattern(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

// =============================================================================
// Replication
// =============================================================================

fn detach(shared: &Arc<Shared>) {
    if let Ok(mut replication) = shared.replication.lock() {
        if let Some(task) = replication.take() {
            task.abort();
            info!("replication detached");
        }
    }
}

fn attach(shared: &Arc<Shared>, master: String) {
    let task_shared = shared.clone();
    let task = tokio::spawn(async move {
        info!(%master, "replicating from master");
        let client = match redis::Client::open(format!("redis://{}", master)) {
            Ok(c) => c,
            Err(e) => {
                error!("replication client: {}", e);
                return;
            }
        };
        let mut conn = None;
        loop {
            if conn.is_none() {
                match client.get_multiplexed_async_connection().await {
                    Ok(c) => conn = Some(c),
                    Err(e) => warn!("connect to master {}: {}", master, e),
                }
            }
            if let Some(c) = conn.as_mut() {
                match fetch_state(c).await {
                    Ok(next) => task_shared.replace(next),
                    Err(e) => {
                        warn!("sync from master {}: {}", master, e);
                        conn = None;
                    }
                }
            }
            tokio::time::sleep(REPLICATION_INTERVAL).await;
        }
    });
    if let Ok(mut replication) = shared.replication.lock() {
        if let Some(previous) = replication.replace(task) {
            previous.abort();
        }
    }
}

/// Pulls the master's full state with plain read commands.
async fn fetch_state(
    conn: &mut redis::aio::MultiplexedConnection,
) -> redis::RedisResult<HashMap<String, Entry>> {
    let keys: Vec<String> = redis::cmd("KEYS").arg("*").query_async(conn).await?;
    let mut state = HashMap::with_capacity(keys.len());
    for key in keys {
        let kind: String = redis::cmd("TYPE").arg(&key).query_async(conn).await?;
        match kind.as_str() {
            "string" => {
                let value: Option<String> = redis::cmd("GET").arg(&key).query_async(conn).await?;
                if let Some(value) = value {
                    state.insert(key, Entry::Str(value));
                }
            }
            "set" => {
                let members: Vec<String> =
                    redis::cmd("SMEMBERS").arg(&key).query_async(conn).await?;
                state.insert(key, Entry::Set(members.into_iter().collect()));
            }
            _ => {}
        }
    }
    Ok(state)
}
