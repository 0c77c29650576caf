//! Playwright browser automation
//!
//! A small node bridge keeps one page alive for the whole run and speaks
//! newline-delimited JSON on stdin/stdout:
//!
//! ```text
//! -> {"id":3,"action":"click","selector":"#login-btn","timeout_ms":5000}
//! <- {"id":3,"ok":false,"error":"Timeout 5000ms exceeded","timed_out":true}
//! -> {"id":4,"action":"screenshot"}
//! <- {"id":4,"ok":true,"png":"iVBORw0..."}
//! ```

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, SessionFactory, StepOutput};
use crate::error::{DriverError, DriverResult};
use crate::spec::{Step, Viewport};

/// Extra time allowed on top of a step's own browser timeout
const REPLY_MARGIN: Duration = Duration::from_secs(5);

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

let browser = null;
let page = null;

function reply(msg) {
  process.stdout.write(JSON.stringify(msg) + '\n');
}

async function handle(cmd) {
  switch (cmd.action) {
    case 'launch': {
      browser = await playwright[cmd.browser].launch({ headless: cmd.headless });
      const context = await browser.newContext({
        viewport: { width: cmd.width, height: cmd.height },
      });
      page = await context.newPage();
      return {};
    }
    case 'navigate':
      await page.goto(cmd.url);
      if (cmd.wait_for_selector) {
        await page.waitForSelector(cmd.wait_for_selector);
      }
      return {};
    case 'click':
      await page.click(cmd.selector, { timeout: cmd.timeout_ms ?? 20000 });
      return {};
    case 'fill':
      await page.fill(cmd.selector, cmd.value);
      return {};
    case 'upload':
      await page.setInputFiles(cmd.selector, cmd.path);
      return {};
    case 'wait':
      await page.waitForSelector(cmd.selector, { state: cmd.state, timeout: cmd.timeout_ms });
      return {};
    case 'screenshot': {
      const png = await page.screenshot();
      return { png: png.toString('base64') };
    }
    case 'close':
      if (browser) {
        await browser.close();
      }
      browser = null;
      page = null;
      return {};
    default:
      throw new Error(`unknown action '${cmd.action}'`);
  }
}

const rl = readline.createInterface({ input: process.stdin });
let queue = Promise.resolve();

rl.on('line', (line) => {
  queue = queue.then(async () => {
    let cmd;
    try {
      cmd = JSON.parse(line);
    } catch (e) {
      console.error(`bad command: ${line}`);
      return;
    }
    try {
      const extra = await handle(cmd);
      reply({ id: cmd.id, ok: true, ...extra });
    } catch (e) {
      reply({ id: cmd.id, ok: false, error: e.message, timed_out: e.name === 'TimeoutError' });
    }
    if (cmd.action === 'close') {
      process.exit(0);
    }
  });
});

rl.on('close', async () => {
  await queue;
  if (browser) {
    await browser.close();
  }
  process.exit(0);
});
"#;

#[derive(Debug, Clone, Copy, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Command that runs the bridge script
    pub node_binary: String,
    pub browser: Browser,
    pub headless: bool,
    pub viewport: Viewport,
    /// Reply deadline for steps without their own timeout
    pub command_timeout: Duration,
    pub launch_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            browser: Browser::Chromium,
            headless: true,
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            command_timeout: Duration::from_secs(60),
            launch_timeout: Duration::from_secs(60),
        }
    }
}

/// One bridge reply
#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    png: Option<String>,
    #[serde(default)]
    timed_out: bool,
}

/// Frame a command: the payload object plus its request id
fn encode_command(id: u64, mut command: Value) -> DriverResult<String> {
    match command.as_object_mut() {
        Some(object) => {
            object.insert("id".to_string(), json!(id));
        }
        None => {
            return Err(DriverError::Bridge(format!(
                "command must be an object, got {}",
                command
            )))
        }
    }
    let mut line = serde_json::to_string(&command)?;
    line.push('\n');
    Ok(line)
}

/// Map a failed reply for `step` onto the step outcome
fn step_outcome(step: &Step, reply: Reply) -> DriverResult<StepOutput> {
    if reply.ok {
        return Ok(StepOutput::Completed);
    }
    let reason = reply
        .error
        .unwrap_or_else(|| "unknown bridge error".to_string());
    match step {
        Step::Click { optional: true, .. } if reply.timed_out => Ok(StepOutput::Skipped(reason)),
        _ if reply.timed_out => Err(DriverError::Timeout(format!(
            "{} ({})",
            step.describe(),
            reason
        ))),
        _ => Err(DriverError::step_failed(step.describe(), reason)),
    }
}

/// Live Playwright page behind the node bridge
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    command_timeout: Duration,
    closed: bool,
    _script_dir: TempDir,
}

impl PlaywrightSession {
    /// Spawn the bridge and open a page
    pub async fn launch(config: &PlaywrightConfig) -> DriverResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        tokio::fs::write(&script_path, BRIDGE_SCRIPT).await?;

        debug!("Starting browser bridge: {} {}", config.node_binary, script_path.display());

        let mut child = Command::new(&config.node_binary)
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::BridgeStartup(format!("Failed to spawn {}: {}", config.node_binary, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::BridgeStartup("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::BridgeStartup("bridge stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "flowcheck::bridge", "{}", line);
                }
            });
        }

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            command_timeout: config.command_timeout,
            closed: false,
            _script_dir: script_dir,
        };

        let launch = json!({
            "action": "launch",
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "width": config.viewport.width,
            "height": config.viewport.height,
        });
        let reply = session
            .request(launch, config.launch_timeout)
            .await
            .map_err(|e| DriverError::BridgeStartup(e.to_string()))?;
        if !reply.ok {
            return Err(DriverError::BridgeStartup(
                reply.error.unwrap_or_else(|| "browser launch failed".to_string()),
            ));
        }

        info!("Browser session ready ({})", config.browser.as_str());
        Ok(session)
    }

    async fn request(&mut self, command: Value, timeout: Duration) -> DriverResult<Reply> {
        if self.closed {
            return Err(DriverError::BridgeClosed);
        }

        self.next_id += 1;
        let id = self.next_id;
        let action = command["action"].as_str().unwrap_or("?").to_string();
        let line = encode_command(id, command)?;

        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        match tokio::time::timeout(timeout, self.read_reply(id)).await {
            Ok(reply) => reply,
            Err(_) => Err(DriverError::Timeout(format!("bridge reply to '{}'", action))),
        }
    }

    /// Read until the reply for `id`; late replies to timed-out requests
    /// and bridge chatter are skipped
    async fn read_reply(&mut self, id: u64) -> DriverResult<Reply> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or(DriverError::BridgeClosed)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Reply>(line) {
                Ok(reply) if reply.id == id => return Ok(reply),
                Ok(reply) => debug!("Dropping stale bridge reply {}", reply.id),
                Err(_) => debug!(target: "flowcheck::bridge", "{}", line),
            }
        }
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn execute(&mut self, step: &Step) -> DriverResult<StepOutput> {
        let timeout = step
            .timeout_ms()
            .map(|ms| Duration::from_millis(ms) + REPLY_MARGIN)
            .unwrap_or(self.command_timeout);
        let reply = self.request(serde_json::to_value(step)?, timeout).await?;
        step_outcome(step, reply)
    }

    async fn screenshot(&mut self) -> DriverResult<Bytes> {
        let reply = self
            .request(json!({ "action": "screenshot" }), self.command_timeout)
            .await?;
        if !reply.ok {
            return Err(DriverError::Bridge(
                reply.error.unwrap_or_else(|| "screenshot failed".to_string()),
            ));
        }
        let png = reply
            .png
            .ok_or_else(|| DriverError::Bridge("screenshot reply without image".to_string()))?;
        let data = base64::engine::general_purpose::STANDARD.decode(png)?;
        Ok(Bytes::from(data))
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }

        if let Err(e) = self
            .request(json!({ "action": "close" }), Duration::from_secs(10))
            .await
        {
            warn!("Browser bridge did not close cleanly: {}", e);
        }
        self.closed = true;

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => debug!("Browser bridge exited with {}", status),
            _ => {
                warn!("Killing browser bridge");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Opens a fresh Playwright session per run
#[derive(Debug, Clone, Default)]
pub struct PlaywrightFactory {
    config: PlaywrightConfig,
}

impl PlaywrightFactory {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for PlaywrightFactory {
    async fn open(&self) -> DriverResult<Box<dyn BrowserSession>> {
        Ok(Box::new(PlaywrightSession::launch(&self.config).await?))
    }
}
