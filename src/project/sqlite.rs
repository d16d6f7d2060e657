// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! SQLite-backed project storage
//!
//! One database file holds the provider APIs, model definitions, agents and a
//! key/value settings table. Base data is laid down once per database and the
//! fact is recorded under the `init.static-data-load.base` setting.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::chat::session::DEFAULT_SYSTEM_PROMPT;
use crate::error::{GenMagicError, Result};
use crate::llm::message::ModelDefinition;
use crate::project::store::{Agent, ApiSummary, ModelSummary, ProjectStore};

/// Setting recording that base data was loaded
pub const STATIC_DATA_SETTING: &str = "init.static-data-load.base";

/// Defaults for freshly created model definitions
pub const DEFAULT_MODEL_NAME: &str = "Un-named LLM";
pub const DEFAULT_MODEL_API: &str = "openrouter";
pub const DEFAULT_MODEL_ENDPOINT: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct:free";

/// Default name for freshly created agents
pub const DEFAULT_AGENT_NAME: &str = "Un-named Agent";

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS Settings (
        id TEXT PRIMARY KEY,
        val TEXT
    );
    CREATE TABLE IF NOT EXISTS APIs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        id_str TEXT NOT NULL UNIQUE,
        name_txt TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS LLMs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name_txt TEXT,
        api INTEGER REFERENCES APIs(id),
        uri TEXT,
        api_key TEXT,
        model TEXT
    );
    CREATE TABLE IF NOT EXISTS Agents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name_txt TEXT,
        llm INTEGER REFERENCES LLMs(id) ON DELETE SET NULL,
        system_txt TEXT
    );
";

const STATIC_DATA_SQL: &str = "
    INSERT OR IGNORE INTO APIs (id_str, name_txt) VALUES ('openrouter', 'OpenRouter');
";

/// Project store persisted in a SQLite database
pub struct SqliteProject {
    conn: Connection,
}

impl SqliteProject {
    /// Open or create a project at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| GenMagicError::Store(format!("Failed to open project: {}", e)))?;
        debug!(path = %path.display(), "opened project database");
        Self::init(conn)
    }

    /// Project that lives only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| GenMagicError::Store(format!("Failed to create schema: {}", e)))?;

        let project = Self { conn };
        if !project.bool_setting(STATIC_DATA_SETTING, false) {
            project
                .conn
                .execute_batch(STATIC_DATA_SQL)
                .map_err(|e| GenMagicError::Store(format!("Failed to load base data: {}", e)))?;
            project.set_bool_setting(STATIC_DATA_SETTING, true)?;
            info!("initialized project base data");
        }
        Ok(project)
    }

    fn raw_setting(&self, key: &str) -> Option<String> {
        let result = self
            .conn
            .query_row(
                "SELECT IFNULL(val, '') FROM Settings WHERE id = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional();
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "failed to read setting");
                None
            }
        }
    }

    /// The setting as a string, or `default` when absent
    pub fn string_setting(&self, key: &str, default: &str) -> String {
        self.raw_setting(key)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn set_string_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO Settings (id, val) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET val = excluded.val",
            params![key, value],
        )?;
        Ok(())
    }

    /// The setting as an integer, or `default` when absent or unparseable
    pub fn int_setting(&self, key: &str, default: i64) -> i64 {
        self.raw_setting(key)
            .and_then(|s| parse_int(&s))
            .unwrap_or(default)
    }

    pub fn set_int_setting(&self, key: &str, value: i64) -> Result<()> {
        self.set_string_setting(key, &value.to_string())
    }

    /// The setting as a boolean, or `default` when absent or unparseable
    pub fn bool_setting(&self, key: &str, default: bool) -> bool {
        self.raw_setting(key)
            .and_then(|s| parse_bool(&s))
            .unwrap_or(default)
    }

    pub fn set_bool_setting(&self, key: &str, value: bool) -> Result<()> {
        self.set_string_setting(key, if value { "true" } else { "false" })
    }

    /// All known provider APIs
    pub fn list_apis(&self) -> Result<Vec<ApiSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id_str, name_txt FROM APIs ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(ApiSummary {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn api_row_id(&self, api: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT id FROM APIs WHERE lower(id_str) = lower(?1)",
                params![api.trim()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| GenMagicError::UnsupportedApi(api.to_string()))
    }

    /// Insert a definition with default values and return it with its id
    pub fn new_model_definition(&self) -> Result<ModelDefinition> {
        let mut def = ModelDefinition::new(DEFAULT_MODEL_API, DEFAULT_MODEL)
            .with_name(DEFAULT_MODEL_NAME)
            .with_endpoint(DEFAULT_MODEL_ENDPOINT);
        let api = self.api_row_id(&def.api)?;
        self.conn.execute(
            "INSERT INTO LLMs (name_txt, api, uri, api_key, model) VALUES (?1, ?2, ?3, '', ?4)",
            params![def.name, api, def.api_endpoint, def.model],
        )?;
        def.id = Some(self.conn.last_insert_rowid());
        Ok(def)
    }

    /// Update a stored definition. The definition must carry an id and name
    /// a known API.
    pub fn set_model_definition(&self, def: &ModelDefinition) -> Result<()> {
        let id = def.id.ok_or_else(|| {
            GenMagicError::Validation("model definition has no id".to_string())
        })?;
        let api = self.api_row_id(&def.api)?;
        let changed = self.conn.execute(
            "UPDATE LLMs SET name_txt = ?1, api = ?2, uri = ?3, api_key = ?4, model = ?5
             WHERE id = ?6",
            params![def.name, api, def.api_endpoint, def.api_key, def.model, id],
        )?;
        if changed == 0 {
            return Err(GenMagicError::NotFound(format!("model definition {}", id)));
        }
        Ok(())
    }

    pub fn delete_model_definition(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM LLMs WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(GenMagicError::NotFound(format!("model definition {}", id)));
        }
        Ok(())
    }

    /// Insert an agent with default values and return it with its id
    pub fn new_agent(&self) -> Result<Agent> {
        let mut agent = Agent::new(DEFAULT_AGENT_NAME, DEFAULT_SYSTEM_PROMPT);
        self.conn.execute(
            "INSERT INTO Agents (name_txt, llm, system_txt) VALUES (?1, NULL, ?2)",
            params![agent.name, agent.system_prompt],
        )?;
        agent.id = Some(self.conn.last_insert_rowid());
        Ok(agent)
    }

    pub fn set_agent(&self, agent: &Agent) -> Result<()> {
        let id = agent
            .id
            .ok_or_else(|| GenMagicError::Validation("agent has no id".to_string()))?;
        let changed = self.conn.execute(
            "UPDATE Agents SET name_txt = ?1, llm = ?2, system_txt = ?3 WHERE id = ?4",
            params![agent.name, agent.model_id, agent.system_prompt, id],
        )?;
        if changed == 0 {
            return Err(GenMagicError::NotFound(format!("agent {}", id)));
        }
        Ok(())
    }

    pub fn delete_agent(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM Agents WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(GenMagicError::NotFound(format!("agent {}", id)));
        }
        Ok(())
    }
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        model_id: row.get(2)?,
        system_prompt: row.get(3)?,
    })
}

impl ProjectStore for SqliteProject {
    fn get_model_definition(&self, id: i64) -> Result<ModelDefinition> {
        self.conn
            .query_row(
                "SELECT LLMs.id,
                        IFNULL(LLMs.name_txt, ''),
                        IFNULL(APIs.id_str, ''),
                        IFNULL(LLMs.uri, ''),
                        IFNULL(LLMs.api_key, ''),
                        IFNULL(LLMs.model, '')
                 FROM LLMs
                 LEFT JOIN APIs ON LLMs.api = APIs.id
                 WHERE LLMs.id = ?1",
                params![id],
                |row| {
                    Ok(ModelDefinition {
                        id: Some(row.get(0)?),
                        name: row.get(1)?,
                        api: row.get(2)?,
                        api_endpoint: row.get(3)?,
                        api_key: row.get(4)?,
                        model: row.get(5)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| GenMagicError::NotFound(format!("model definition {}", id)))
    }

    fn list_model_definitions(&self) -> Result<Vec<ModelSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, IFNULL(name_txt, '') FROM LLMs ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(ModelSummary {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn get_agent(&self, id: i64) -> Result<Agent> {
        self.conn
            .query_row(
                "SELECT id, IFNULL(name_txt, ''), llm, IFNULL(system_txt, '')
                 FROM Agents WHERE id = ?1",
                params![id],
                agent_from_row,
            )
            .optional()?
            .ok_or_else(|| GenMagicError::NotFound(format!("agent {}", id)))
    }

    fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, IFNULL(name_txt, ''), llm, IFNULL(system_txt, '')
             FROM Agents ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], agent_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

/// Integer with optional sign and 0x/0o/0b prefix
fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let lower = digits.to_ascii_lowercase();
    let value = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        lower.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
