//! Blog entities.

use std::time::{SystemTime, UNIX_EPOCH};

use awesome_db::{Field, Value, entity};
use serde::{Deserialize, Serialize};

/// Time-ordered unique id: 15-digit millisecond timestamp, 32 hex digits of a
/// random UUID, then `000`.
pub fn next_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{millis:015}{}000", uuid::Uuid::new_v4().simple())
}

/// Seconds since the epoch, as stored in `created_at`.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

fn id_field() -> Field {
    Field::string()
        .primary_key()
        .ddl("varchar(50)")
        .default_with(|| Value::from(next_id()))
}

fn created_at_field() -> Field {
    Field::float().default_with(|| Value::from(now()))
}

entity! {
    #[derive(Serialize, Deserialize)]
    pub struct User in "users" {
        id: String = id_field(),
        email: String = Field::string().ddl("varchar(50)"),
        passwd: String = Field::string().ddl("varchar(50)"),
        admin: bool = Field::boolean(),
        name: String = Field::string().ddl("varchar(50)"),
        image: String = Field::string().ddl("varchar(500)"),
        created_at: f64 = created_at_field(),
    }
}

entity! {
    #[derive(Serialize, Deserialize)]
    pub struct Blog in "blogs" {
        id: String = id_field(),
        user_id: String = Field::string().ddl("varchar(50)"),
        user_name: String = Field::string().ddl("varchar(50)"),
        user_image: String = Field::string().ddl("varchar(500)"),
        name: String = Field::string().ddl("varchar(50)"),
        summary: String = Field::string().ddl("varchar(200)"),
        content: String = Field::text(),
        created_at: f64 = created_at_field(),
    }
}

entity! {
    #[derive(Serialize, Deserialize)]
    pub struct Comment in "comments" {
        id: String = id_field(),
        blog_id: String = Field::string().ddl("varchar(50)"),
        user_id: String = Field::string().ddl("varchar(50)"),
        user_name: String = Field::string().ddl("varchar(50)"),
        user_image: String = Field::string().ddl("varchar(500)"),
        content: String = Field::text(),
        created_at: f64 = created_at_field(),
    }
}

impl User {
    /// Copy safe to hand to API clients.
    pub fn masked(mut self) -> Self {
        if self.passwd.is_some() {
            self.passwd = Some("******".to_string());
        }
        self
    }
}
