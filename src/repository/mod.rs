//! # Persistence Contracts
//!
//! Account, character and item repositories consumed at the login and
//! migrate-in boundaries. The field core never touches them.
//!
//! [`MemoryStore`] implements every trait in memory and can be preloaded from
//! a TOML seed file:
//!
//! ```toml
//! [[accounts]]
//! id = 1
//! name = "admin"
//! password = "admin"
//!
//! [[characters]]
//! id = 42
//! account_id = 1
//! name = "Tester"
//! map_id = 100000000
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::DEFAULT_MAP_ID;
use crate::error::{constants, Result, ServerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i32,
    pub name: String,
    /// `salt$digest`, see [`hash_password`]
    pub password_hash: String,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub gender: u8,
    #[serde(default)]
    pub gm_level: u8,
}

impl Account {
    pub fn check_password(&self, password: &str) -> bool {
        verify_password(password, &self.password_hash)
    }
}

/// Salted hash in the form `salt$digest`: a fresh random 16-byte salt and
/// the SHA-256 of salt followed by password, both hex-encoded.
pub fn hash_password(password: &str) -> String {
    let salt = to_hex(&rand::random::<[u8; 16]>());
    let digest = salted_digest(&salt, password);
    format!("{salt}${digest}")
}

/// Check `password` against a value produced by [`hash_password`].
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    let computed = salted_digest(salt, password);
    computed.len() == digest.len()
        && computed
            .bytes()
            .zip(digest.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn salted_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: i32,
    pub account_id: i32,
    #[serde(default)]
    pub world_id: u8,
    pub name: String,
    #[serde(default)]
    pub gender: u8,
    #[serde(default)]
    pub skin: u8,
    #[serde(default = "default_face")]
    pub face: i32,
    #[serde(default = "default_hair")]
    pub hair: i32,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default)]
    pub job: i16,
    #[serde(default = "default_stat")]
    pub str: i16,
    #[serde(default = "default_stat")]
    pub dex: i16,
    #[serde(default = "default_stat")]
    pub int: i16,
    #[serde(default = "default_stat")]
    pub luk: i16,
    #[serde(default = "default_hp")]
    pub hp: i16,
    #[serde(default = "default_hp")]
    pub max_hp: i16,
    #[serde(default = "default_hp")]
    pub mp: i16,
    #[serde(default = "default_hp")]
    pub max_mp: i16,
    #[serde(default)]
    pub exp: i32,
    #[serde(default)]
    pub meso: i32,
    #[serde(default = "default_map")]
    pub map_id: i32,
    #[serde(default)]
    pub spawn_point: u8,
}

fn default_face() -> i32 {
    20000
}
fn default_hair() -> i32 {
    30000
}
fn default_level() -> u8 {
    1
}
fn default_stat() -> i16 {
    4
}
fn default_hp() -> i16 {
    50
}
fn default_map() -> i32 {
    DEFAULT_MAP_ID
}

impl Character {
    /// A fresh level-1 character on the default map.
    pub fn new(id: i32, account_id: i32, world_id: u8, name: &str) -> Self {
        Self {
            id,
            account_id,
            world_id,
            name: name.to_string(),
            gender: 0,
            skin: 0,
            face: default_face(),
            hair: default_hair(),
            level: default_level(),
            job: 0,
            str: default_stat(),
            dex: default_stat(),
            int: default_stat(),
            luk: default_stat(),
            hp: default_hp(),
            max_hp: default_hp(),
            mp: default_hp(),
            max_mp: default_hp(),
            exp: 0,
            meso: 0,
            map_id: default_map(),
            spawn_point: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: i64,
    pub character_id: i32,
    pub item_id: i32,
    #[serde(default)]
    pub slot: i16,
    #[serde(default = "default_quantity")]
    pub quantity: i16,
}

fn default_quantity() -> i16 {
    1
}

pub trait AccountRepository: Send + Sync {
    fn find_by_id(&self, id: i32) -> BoxFuture<'_, Result<Option<Account>>>;
    fn find_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Account>>>;
    fn create(&self, account: Account) -> BoxFuture<'_, Result<Account>>;
    fn update(&self, account: Account) -> BoxFuture<'_, Result<()>>;
}

pub trait CharacterRepository: Send + Sync {
    fn find_by_id(&self, id: i32) -> BoxFuture<'_, Result<Option<Character>>>;
    fn find_by_account_id(&self, account_id: i32) -> BoxFuture<'_, Result<Vec<Character>>>;
    fn create(&self, character: Character) -> BoxFuture<'_, Result<Character>>;
    fn update(&self, character: Character) -> BoxFuture<'_, Result<()>>;
}

pub trait ItemRepository: Send + Sync {
    fn find_by_character_id(&self, character_id: i32) -> BoxFuture<'_, Result<Vec<Item>>>;
    fn create(&self, item: Item) -> BoxFuture<'_, Result<Item>>;
    fn update(&self, item: Item) -> BoxFuture<'_, Result<()>>;
    fn delete(&self, id: i64) -> BoxFuture<'_, Result<()>>;
}

/// The three repositories a channel session needs, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub accounts: Arc<dyn AccountRepository>,
    pub characters: Arc<dyn CharacterRepository>,
    pub items: Arc<dyn ItemRepository>,
}

impl Repositories {
    /// All three backed by one in-memory store.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            accounts: store.clone(),
            characters: store.clone(),
            items: store,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    accounts: Vec<SeedAccount>,
    #[serde(default)]
    characters: Vec<Character>,
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct SeedAccount {
    id: i32,
    name: String,
    password: String,
    #[serde(default)]
    banned: bool,
    #[serde(default)]
    gender: u8,
    #[serde(default)]
    gm_level: u8,
}

/// In-memory implementation of every repository trait.
#[derive(Debug)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<i32, Account>>,
    characters: RwLock<HashMap<i32, Character>>,
    items: RwLock<HashMap<i64, Item>>,
    next_account: AtomicI32,
    next_character: AtomicI32,
    next_item: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            characters: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            next_account: AtomicI32::new(1),
            next_character: AtomicI32::new(1),
            next_item: AtomicI64::new(1),
        }
    }

    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ServerError::Repository(format!(
                "Failed to read seed file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_seed_toml(&text)
    }

    pub fn from_seed_toml(text: &str) -> Result<Self> {
        let seed: SeedFile = toml::from_str(text)
            .map_err(|e| ServerError::Repository(format!("Failed to parse seed file: {e}")))?;
        let store = Self::new();
        for a in seed.accounts {
            store.insert_account(Account {
                id: a.id,
                name: a.name,
                password_hash: hash_password(&a.password),
                banned: a.banned,
                gender: a.gender,
                gm_level: a.gm_level,
            });
        }
        for c in seed.characters {
            store.insert_character(c);
        }
        for mut item in seed.items {
            if item.id == 0 {
                item.id = store.next_item.fetch_add(1, Ordering::Relaxed);
            }
            store.insert_item(item);
        }
        info!(
            accounts = store.accounts.read().len(),
            characters = store.characters.read().len(),
            "Seed data loaded"
        );
        Ok(store)
    }

    /// Insert or replace an account, keeping id allocation ahead of it.
    pub fn insert_account(&self, account: Account) {
        self.next_account.fetch_max(account.id + 1, Ordering::Relaxed);
        self.accounts.write().insert(account.id, account);
    }

    pub fn insert_character(&self, character: Character) {
        self.next_character
            .fetch_max(character.id + 1, Ordering::Relaxed);
        self.characters.write().insert(character.id, character);
    }

    pub fn insert_item(&self, item: Item) {
        self.next_item.fetch_max(item.id + 1, Ordering::Relaxed);
        self.items.write().insert(item.id, item);
    }

    /// Flip an account's ban flag in place.
    pub fn set_banned(&self, account_id: i32, banned: bool) -> bool {
        match self.accounts.write().get_mut(&account_id) {
            Some(account) => {
                account.banned = banned;
                true
            }
            None => false,
        }
    }
}

impl AccountRepository for MemoryStore {
    fn find_by_id(&self, id: i32) -> BoxFuture<'_, Result<Option<Account>>> {
        let found = self.accounts.read().get(&id).cloned();
        Box::pin(future::ready(Ok(found)))
    }

    fn find_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Account>>> {
        let found = self
            .accounts
            .read()
            .values()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned();
        Box::pin(future::ready(Ok(found)))
    }

    fn create(&self, mut account: Account) -> BoxFuture<'_, Result<Account>> {
        let result = {
            let mut accounts = self.accounts.write();
            if accounts
                .values()
                .any(|a| a.name.eq_ignore_ascii_case(&account.name))
            {
                Err(ServerError::Repository(
                    constants::ERR_DUPLICATE_NAME.to_string(),
                ))
            } else {
                account.id = self.next_account.fetch_add(1, Ordering::Relaxed);
                accounts.insert(account.id, account.clone());
                debug!(account_id = account.id, "Account created");
                Ok(account)
            }
        };
        Box::pin(future::ready(result))
    }

    fn update(&self, account: Account) -> BoxFuture<'_, Result<()>> {
        let result = match self.accounts.write().get_mut(&account.id) {
            Some(slot) => {
                *slot = account;
                Ok(())
            }
            None => Err(ServerError::Repository(
                constants::ERR_RECORD_NOT_FOUND.to_string(),
            )),
        };
        Box::pin(future::ready(result))
    }
}

impl CharacterRepository for MemoryStore {
    fn find_by_id(&self, id: i32) -> BoxFuture<'_, Result<Option<Character>>> {
        let found = self.characters.read().get(&id).cloned();
        Box::pin(future::ready(Ok(found)))
    }

    fn find_by_account_id(&self, account_id: i32) -> BoxFuture<'_, Result<Vec<Character>>> {
        let mut found: Vec<_> = self
            .characters
            .read()
            .values()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.id);
        Box::pin(future::ready(Ok(found)))
    }

    fn create(&self, mut character: Character) -> BoxFuture<'_, Result<Character>> {
        let result = {
            let mut characters = self.characters.write();
            if characters
                .values()
                .any(|c| c.name.eq_ignore_ascii_case(&character.name))
            {
                Err(ServerError::Repository(
                    constants::ERR_DUPLICATE_NAME.to_string(),
                ))
            } else {
                character.id = self.next_character.fetch_add(1, Ordering::Relaxed);
                characters.insert(character.id, character.clone());
                debug!(character_id = character.id, "Character created");
                Ok(character)
            }
        };
        Box::pin(future::ready(result))
    }

    fn update(&self, character: Character) -> BoxFuture<'_, Result<()>> {
        let result = match self.characters.write().get_mut(&character.id) {
            Some(slot) => {
                *slot = character;
                Ok(())
            }
            None => Err(ServerError::Repository(
                constants::ERR_RECORD_NOT_FOUND.to_string(),
            )),
        };
        Box::pin(future::ready(result))
    }
}

impl ItemRepository for MemoryStore {
    fn find_by_character_id(&self, character_id: i32) -> BoxFuture<'_, Result<Vec<Item>>> {
        let mut found: Vec<_> = self
            .items
            .read()
            .values()
            .filter(|i| i.character_id == character_id)
            .cloned()
            .collect();
        found.sort_by_key(|i| i.id);
        Box::pin(future::ready(Ok(found)))
    }

    fn create(&self, mut item: Item) -> BoxFuture<'_, Result<Item>> {
        item.id = self.next_item.fetch_add(1, Ordering::Relaxed);
        self.items.write().insert(item.id, item.clone());
        Box::pin(future::ready(Ok(item)))
    }

    fn update(&self, item: Item) -> BoxFuture<'_, Result<()>> {
        let result = match self.items.write().get_mut(&item.id) {
            Some(slot) => {
                *slot = item;
                Ok(())
            }
            None => Err(ServerError::Repository(
                constants::ERR_RECORD_NOT_FOUND.to_string(),
            )),
        };
        Box::pin(future::ready(result))
    }

    fn delete(&self, id: i64) -> BoxFuture<'_, Result<()>> {
        self.items.write().remove(&id);
        Box::pin(future::ready(Ok(())))
    }
}
