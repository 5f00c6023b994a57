//! # Script Execution
//!
//! NPC and portal dialogs run as their own tasks. A script talks to the
//! player through a [`ScriptContext`] and suspends on a single-slot
//! [`ResponseSlot`] until the client answers, the dialog times out, or a newer
//! conversation supersedes it. Timeouts and supersession both surface as
//! [`DialogResponse::Ended`], which scripts propagate as an error to unwind.
//!
//! The language runtime is behind [`ScriptExecutor`]; [`BuiltinScripts`]
//! maps script names to Rust closures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::error::{constants, Result, ServerError};
use crate::repository::Item;
use crate::service::packets::{self, DialogKind};
use crate::utils::global_metrics;
use crate::world::character::Character;

/// What the player answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogResponse {
    Next,
    Prev,
    Yes,
    No,
    Selection(i32),
    /// Closed, timed out or superseded.
    Ended,
}

/// Single-slot inbox. A newer response overwrites an unread older one.
#[derive(Debug, Default)]
pub struct ResponseSlot {
    value: Mutex<Option<DialogResponse>>,
    notify: Notify,
    ended: AtomicBool,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, response: DialogResponse) {
        *self.value.lock() = Some(response);
        self.notify.notify_one();
    }

    /// Wake the waiter with [`DialogResponse::Ended`]; every later wait ends
    /// immediately.
    pub fn end(&self) {
        self.ended.store(true, Ordering::Release);
        self.deliver(DialogResponse::Ended);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Drop any unread response before prompting again.
    pub fn clear(&self) {
        self.value.lock().take();
    }

    /// Wait for the next response; [`DialogResponse::Ended`] on timeout.
    pub async fn wait(&self, timeout: Duration) -> DialogResponse {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_ended() {
                return DialogResponse::Ended;
            }
            if let Some(response) = self.value.lock().take() {
                return response;
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return DialogResponse::Ended;
            }
        }
    }
}

/// Warp asked for by a script, carried out by the owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarpRequest {
    pub map_id: i32,
    pub portal: Option<String>,
}

/// Capability object handed to a running script.
#[derive(Clone)]
pub struct ScriptContext {
    character: Arc<Character>,
    npc_id: i32,
    slot: Arc<ResponseSlot>,
    dialog_timeout: Duration,
    warps: mpsc::Sender<WarpRequest>,
}

fn conversation_ended() -> ServerError {
    ServerError::Script(constants::ERR_CONVERSATION_ENDED.to_string())
}

/// Whether an error is the normal unwind of a closed conversation.
pub fn is_conversation_end(err: &ServerError) -> bool {
    matches!(err, ServerError::Script(msg) if msg == constants::ERR_CONVERSATION_ENDED)
}

impl ScriptContext {
    pub fn new(
        character: Arc<Character>,
        npc_id: i32,
        slot: Arc<ResponseSlot>,
        dialog_timeout: Duration,
        warps: mpsc::Sender<WarpRequest>,
    ) -> Self {
        Self {
            character,
            npc_id,
            slot,
            dialog_timeout,
            warps,
        }
    }

    pub fn character_id(&self) -> i32 {
        self.character.id()
    }

    pub fn name(&self) -> &str {
        self.character.name()
    }

    pub fn npc_id(&self) -> i32 {
        self.npc_id
    }

    pub fn map_id(&self) -> i32 {
        self.character.map_id()
    }

    pub fn level(&self) -> u8 {
        self.character.state().record.level
    }

    pub fn job(&self) -> i16 {
        self.character.state().record.job
    }

    pub fn meso(&self) -> i32 {
        self.character.state().record.meso
    }

    /// Add (or with a negative amount, take) meso. Fails without change if
    /// the result would be negative or overflow.
    pub fn gain_meso(&self, amount: i32) -> bool {
        let updated = {
            let mut state = self.character.state();
            match state.record.meso.checked_add(amount) {
                Some(v) if v >= 0 => {
                    state.record.meso = v;
                    Some(v)
                }
                _ => None,
            }
        };
        match updated {
            Some(v) => {
                self.character.send(packets::stat_changed(packets::stat::MESO, v));
                true
            }
            None => false,
        }
    }

    pub fn item_count(&self, item_id: i32) -> i32 {
        self.character
            .state()
            .items
            .iter()
            .filter(|i| i.item_id == item_id)
            .map(|i| i.quantity as i32)
            .sum()
    }

    /// Add or remove items. Removal fails without change if there are not
    /// enough.
    pub fn gain_item(&self, item_id: i32, quantity: i16) -> bool {
        let mut state = self.character.state();
        if quantity >= 0 {
            let next_slot = state.items.iter().map(|i| i.slot).max().unwrap_or(0) + 1;
            match state.items.iter_mut().find(|i| i.item_id == item_id) {
                Some(item) => match item.quantity.checked_add(quantity) {
                    Some(q) => item.quantity = q,
                    None => return false,
                },
                None => state.items.push(Item {
                    id: 0,
                    character_id: self.character.id(),
                    item_id,
                    slot: next_slot,
                    quantity,
                }),
            }
            return true;
        }

        let mut needed = -(quantity as i32);
        let held: i32 = state
            .items
            .iter()
            .filter(|i| i.item_id == item_id)
            .map(|i| i.quantity as i32)
            .sum();
        if held < needed {
            return false;
        }
        for item in state.items.iter_mut().filter(|i| i.item_id == item_id) {
            let take = needed.min(item.quantity as i32);
            item.quantity -= take as i16;
            needed -= take;
        }
        state.items.retain(|i| i.quantity > 0);
        true
    }

    /// Ask the session to move the character.
    pub fn warp(&self, map_id: i32, portal: Option<&str>) -> Result<()> {
        self.warps
            .try_send(WarpRequest {
                map_id,
                portal: portal.map(str::to_string),
            })
            .map_err(|_| ServerError::Script(format!("warp to {map_id} could not be queued")))
    }

    async fn prompt(&self, kind: DialogKind, text: &str, prev: bool, next: bool) -> DialogResponse {
        self.slot.clear();
        if !self
            .character
            .send(packets::npc_talk(self.npc_id, kind, text, prev, next))
        {
            return DialogResponse::Ended;
        }
        self.slot.wait(self.dialog_timeout).await
    }

    /// Plain message with a "next" button.
    pub async fn say(&self, text: &str) -> Result<()> {
        match self.prompt(DialogKind::Say, text, false, true).await {
            DialogResponse::Ended => Err(conversation_ended()),
            _ => Ok(()),
        }
    }

    pub async fn ask_yes_no(&self, text: &str) -> Result<bool> {
        match self.prompt(DialogKind::YesNo, text, false, false).await {
            DialogResponse::Yes => Ok(true),
            DialogResponse::No => Ok(false),
            _ => Err(conversation_ended()),
        }
    }

    /// Numbered menu; returns the chosen index.
    pub async fn ask_menu(&self, text: &str, options: &[&str]) -> Result<usize> {
        let mut body = String::from(text);
        for (i, option) in options.iter().enumerate() {
            body.push_str(&format!("\r\n#L{i}#{option}#l"));
        }
        match self.prompt(DialogKind::Menu, &body, false, false).await {
            DialogResponse::Selection(i) if i >= 0 && (i as usize) < options.len() => Ok(i as usize),
            DialogResponse::Selection(i) => Err(ServerError::Script(format!(
                "menu selection {i} out of range"
            ))),
            _ => Err(conversation_ended()),
        }
    }
}

/// Runs a named script against a capability object.
pub trait ScriptExecutor: Send + Sync {
    fn execute(&self, script: &str, ctx: ScriptContext) -> BoxFuture<'static, Result<()>>;
}

type ScriptFn = Arc<dyn Fn(ScriptContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Scripts written as Rust closures, keyed by name.
#[derive(Default, Clone)]
pub struct BuiltinScripts {
    scripts: HashMap<String, ScriptFn>,
}

impl BuiltinScripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: &str, script: F) -> Self
    where
        F: Fn(ScriptContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.scripts.insert(name.to_string(), Arc::new(script));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    /// The starter scripts shipped with the server.
    pub fn with_defaults() -> Self {
        Self::new().register("taxi", |ctx| {
            async move {
                const DESTINATIONS: [(&str, i32); 2] = [
                    ("Henesys", crate::config::DEFAULT_MAP_ID),
                    ("Henesys Hunting Ground I", 100_010_000),
                ];
                let names: Vec<&str> = DESTINATIONS.iter().map(|(n, _)| *n).collect();
                let choice = ctx
                    .ask_menu("Where would you like to go?", &names)
                    .await?;
                let (name, map_id) = DESTINATIONS[choice];
                if ctx.ask_yes_no(&format!("Head to {name}?")).await? {
                    ctx.warp(map_id, None)?;
                } else {
                    ctx.say("Come back any time.").await?;
                }
                Ok(())
            }
            .boxed()
        })
    }
}

impl ScriptExecutor for BuiltinScripts {
    fn execute(&self, script: &str, ctx: ScriptContext) -> BoxFuture<'static, Result<()>> {
        match self.scripts.get(script) {
            Some(f) => f(ctx),
            None => {
                let name = script.to_string();
                async move {
                    Err(ServerError::Script(format!(
                        "{}: {name}",
                        constants::ERR_SCRIPT_NOT_FOUND
                    )))
                }
                .boxed()
            }
        }
    }
}

/// How a conversation finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Completed,
    /// Dialog closed, timed out or superseded.
    Ended,
    Failed(String),
}

struct Active {
    id: u64,
    slot: Arc<ResponseSlot>,
}

/// The one conversation a session may have open.
pub struct Conversations {
    executor: Arc<dyn ScriptExecutor>,
    dialog_timeout: Duration,
    active: Arc<Mutex<Option<Active>>>,
    next_id: AtomicU64,
}

impl Conversations {
    pub fn new(executor: Arc<dyn ScriptExecutor>, dialog_timeout: Duration) -> Self {
        Self {
            executor,
            dialog_timeout,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Start `script`, ending any conversation already open.
    ///
    /// `on_complete` runs exactly once when the script task finishes, however
    /// it finishes.
    pub fn start<F>(
        &self,
        character: Arc<Character>,
        npc_id: i32,
        script: &str,
        warps: mpsc::Sender<WarpRequest>,
        on_complete: F,
    ) -> u64
    where
        F: FnOnce(ScriptOutcome) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ResponseSlot::new());
        if let Some(previous) = self.active.lock().replace(Active {
            id,
            slot: slot.clone(),
        }) {
            debug!(conversation = previous.id, "Conversation superseded");
            previous.slot.end();
        }

        let character_id = character.id();
        let ctx = ScriptContext::new(character, npc_id, slot, self.dialog_timeout, warps);
        let run = self.executor.execute(script, ctx);
        let active = self.active.clone();
        let script = script.to_string();

        tokio::spawn(async move {
            let outcome = match std::panic::AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(())) => ScriptOutcome::Completed,
                Ok(Err(e)) if is_conversation_end(&e) => ScriptOutcome::Ended,
                Ok(Err(e)) => {
                    global_metrics().script_fault();
                    warn!(character_id, script = %script, error = %e, "Script failed");
                    ScriptOutcome::Failed(e.to_string())
                }
                Err(_) => {
                    global_metrics().script_fault();
                    warn!(character_id, script = %script, "Script panicked");
                    ScriptOutcome::Failed(String::from("script panicked"))
                }
            };

            {
                let mut guard = active.lock();
                if guard.as_ref().is_some_and(|a| a.id == id) {
                    guard.take();
                }
            }
            info!(character_id, script = %script, outcome = ?outcome, "Conversation finished");
            on_complete(outcome);
        });
        id
    }

    /// Hand a client answer to the open conversation.
    pub fn deliver(&self, response: DialogResponse) -> bool {
        match self.active.lock().as_ref() {
            Some(active) => {
                active.slot.deliver(response);
                true
            }
            None => false,
        }
    }

    /// End the open conversation, if any.
    pub fn end(&self) {
        if let Some(active) = self.active.lock().take() {
            active.slot.end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::movement::Point;
    use crate::repository;
    use crate::transport::ConnectionHandle;
    use tokio::sync::oneshot;

    fn character() -> (Arc<Character>, mpsc::Receiver<crate::core::packet::Packet>) {
        let (conn, rx) = ConnectionHandle::detached("127.0.0.1:1".parse().unwrap(), 32);
        let record = repository::Character::new(42, 7, 0, "Tester");
        (Character::new(record, Vec::new(), Point::default(), conn), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_as_ended() {
        let slot = ResponseSlot::new();
        assert_eq!(slot.wait(Duration::from_secs(60)).await, DialogResponse::Ended);
    }

    #[tokio::test]
    async fn newer_response_overwrites_unread() {
        let slot = ResponseSlot::new();
        slot.deliver(DialogResponse::Yes);
        slot.deliver(DialogResponse::No);
        assert_eq!(slot.wait(Duration::from_secs(1)).await, DialogResponse::No);
    }

    #[tokio::test]
    async fn end_wakes_a_blocked_waiter() {
        let slot = Arc::new(ResponseSlot::new());
        let waiter = tokio::spawn({
            let slot = slot.clone();
            async move { slot.wait(Duration::from_secs(3600)).await }
        });
        tokio::task::yield_now().await;
        slot.end();
        assert_eq!(waiter.await.unwrap(), DialogResponse::Ended);
    }

    #[tokio::test]
    async fn inventory_capabilities() {
        let (character, _rx) = character();
        let (warps, _warp_rx) = mpsc::channel(1);
        let ctx = ScriptContext::new(
            character,
            1,
            Arc::new(ResponseSlot::new()),
            Duration::from_secs(1),
            warps,
        );
        assert!(ctx.gain_item(2000000, 3));
        assert!(ctx.gain_item(2000000, 2));
        assert_eq!(ctx.item_count(2000000), 5);
        assert!(!ctx.gain_item(2000000, -6));
        assert!(ctx.gain_item(2000000, -5));
        assert_eq!(ctx.item_count(2000000), 0);
        assert!(!ctx.gain_meso(-1));
        assert!(ctx.gain_meso(100));
        assert_eq!(ctx.meso(), 100);
    }

    #[tokio::test]
    async fn supersession_ends_previous_and_completion_fires() {
        let (character, _rx) = character();
        let scripts = BuiltinScripts::new().register("ask", |ctx| {
            async move {
                ctx.ask_yes_no("?").await?;
                Ok(())
            }
            .boxed()
        });
        let conversations = Conversations::new(Arc::new(scripts), Duration::from_secs(3600));
        let (warps, _warp_rx) = mpsc::channel(1);

        let (first_tx, first_rx) = oneshot::channel();
        conversations.start(character.clone(), 1, "ask", warps.clone(), move |o| {
            let _ = first_tx.send(o);
        });
        let (second_tx, second_rx) = oneshot::channel();
        conversations.start(character, 1, "ask", warps, move |o| {
            let _ = second_tx.send(o);
        });

        assert_eq!(first_rx.await.unwrap(), ScriptOutcome::Ended);
        assert!(conversations.is_active());
        tokio::task::yield_now().await;
        assert!(conversations.deliver(DialogResponse::Yes));
        assert_eq!(second_rx.await.unwrap(), ScriptOutcome::Completed);
        assert!(!conversations.is_active());
    }

    #[tokio::test]
    async fn unknown_script_fails_without_panicking() {
        let (character, _rx) = character();
        let conversations =
            Conversations::new(Arc::new(BuiltinScripts::new()), Duration::from_secs(1));
        let (warps, _warp_rx) = mpsc::channel(1);
        let (tx, rx) = oneshot::channel();
        conversations.start(character, 1, "missing", warps, move |o| {
            let _ = tx.send(o);
        });
        assert!(matches!(rx.await.unwrap(), ScriptOutcome::Failed(_)));
    }
}
