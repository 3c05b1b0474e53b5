//! Integration test infrastructure: an in-process server and a
//! line-oriented test client.

#![allow(dead_code)]

use emberd::config::{
    Config, DatabaseConfig, FeaturesConfig, LoggingConfig, SecurityConfig, ServerConfig,
    ThreadPoolConfig,
};
use emberd::crypto::hashing::sha256_hex;
use emberd::crypto::CryptoManager;
use emberd::db::Database;
use emberd::network::Gateway;
use emberd::security::session::spawn_sweeper;
use emberd::state::Hub;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// An in-process server instance bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    task: JoinHandle<anyhow::Result<()>>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn spawn() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);

        let db = Database::new(&config.database).await?;
        let crypto = Arc::new(CryptoManager::initialize(&config.security)?);
        let hub = Arc::new(Hub::new(config, db, crypto));

        spawn_sweeper(Arc::clone(&hub.sessions), hub.shutdown.clone());

        let gateway = Gateway::bind(Arc::clone(&hub)).await?;
        let addr = gateway.local_addr()?;
        let task = tokio::spawn(gateway.run());

        Ok(Self {
            addr,
            hub,
            task,
            _dir: dir,
        })
    }

    /// Trigger the graceful shutdown sequence and wait for it to finish.
    pub async fn shutdown(self) {
        self.hub.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.task).await;
    }

    /// Promote an account to operator directly in the store.
    pub async fn make_operator(&self, username: &str) {
        let account = self
            .hub
            .db
            .accounts()
            .get_by_username(username)
            .await
            .expect("account exists");
        self.hub
            .db
            .accounts()
            .set_operator(account.id, true)
            .await
            .expect("set operator");
    }
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 64,
            read_timeout_secs: 30,
            write_timeout_secs: 10,
            server_name: "test.ember".into(),
            motd: String::new(),
        },
        database: DatabaseConfig {
            path: dir.path().join("test.db").to_string_lossy().into_owned(),
            max_open_conns: 4,
            max_idle_conns: 1,
            conn_max_lifetime_secs: 600,
        },
        security: SecurityConfig {
            rsa_key_size: 2048,
            rsa_private_key_path: dir.path().join("rsa.pem").to_string_lossy().into_owned(),
            rsa_public_key_path: dir.path().join("rsa.pub.pem").to_string_lossy().into_owned(),
            aes_key_size: 256,
            aes_mode: "GCM".into(),
            session_timeout_secs: 3600,
            max_ip_suspicion: 3,
            enable_ip_tracking: true,
            password_min_length: 8,
            password_require_special: false,
            max_login_attempts: 5,
            login_attempt_window_secs: 300,
        },
        threadpool: ThreadPoolConfig::default(),
        logging: LoggingConfig::default(),
        features: FeaturesConfig::default(),
    }
}

/// A line-oriented test client.
pub struct TestClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect and consume the greeting (welcome NOTICE + PUBKEY block).
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
        };

        let welcome = client.recv().await?;
        anyhow::ensure!(
            welcome.contains("Welcome"),
            "expected welcome NOTICE, got: {welcome}"
        );
        // The PEM body spans several lines; consume through the END marker.
        client
            .recv_until(|line| line.starts_with("-----END"))
            .await?;
        Ok(client)
    }

    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next non-empty line, bounded by a five-second timeout.
    pub async fn recv(&mut self) -> anyhow::Result<String> {
        loop {
            let line = tokio::time::timeout(RECV_TIMEOUT, self.reader.next_line())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for a line"))??
                .ok_or_else(|| anyhow::anyhow!("connection closed"))?;
            if !line.trim().is_empty() {
                return Ok(line);
            }
        }
    }

    /// Read lines until one matches, returning the matching line.
    pub async fn recv_until(
        &mut self,
        pred: impl Fn(&str) -> bool,
    ) -> anyhow::Result<String> {
        for _ in 0..100 {
            let line = self.recv().await?;
            if pred(&line) {
                return Ok(line);
            }
        }
        anyhow::bail!("predicate not satisfied within 100 lines")
    }

    /// True if the connection reaches EOF within the timeout.
    pub async fn expect_closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.reader.next_line()).await {
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) => return true,
                Ok(Err(_)) => return true,
                Err(_) => return false,
            }
        }
    }

    /// The client-side transport form of a password: its SHA-256 hex digest.
    pub fn password_hash(password: &str) -> String {
        sha256_hex(password)
    }

    /// Register an account and wait for the success NOTICE.
    pub async fn register(&mut self, username: &str, password: &str) -> anyhow::Result<()> {
        self.send(&format!(
            "REGISTER {username} {}",
            Self::password_hash(password)
        ))
        .await?;
        self.recv_until(|l| l.contains("Registration successful"))
            .await?;
        Ok(())
    }

    /// Log in and return the session id from the success NOTICE.
    pub async fn login(&mut self, username: &str, password: &str) -> anyhow::Result<String> {
        self.send(&format!(
            "LOGIN {username} {}",
            Self::password_hash(password)
        ))
        .await?;
        let line = self
            .recv_until(|l| l.contains("Login successful"))
            .await?;
        let session_id = line
            .rsplit(' ')
            .next()
            .unwrap_or_default()
            .to_string();
        // Key-exchange hint NOTICE follows.
        self.recv_until(|l| l.contains("KEYEXCHANGE")).await?;
        Ok(session_id)
    }

    /// Register, log in, and join in one step.
    pub async fn register_and_login(
        &mut self,
        username: &str,
        password: &str,
    ) -> anyhow::Result<String> {
        self.register(username, password).await?;
        self.login(username, password).await
    }
}
