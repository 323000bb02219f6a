use std::str::FromStr;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Project,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Project => "project",
            Self::Other => "other",
        }
    }
}

impl FromStr for EntityType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "person" => Ok(Self::Person),
            "organization" => Ok(Self::Organization),
            "project" => Ok(Self::Project),
            _ => Ok(Self::Other),
        }
    }
}

stored_object!(Entity, "entity", {
    name: String,
    normalized_name: String,
    entity_type: EntityType,
    email: Option<String>,
    role: Option<String>,
    organization: Option<String>
});

/// Casefold, trim, and collapse internal whitespace. Every lookup and every
/// stored `normalized_name` goes through this, so matches are stable.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl Entity {
    pub fn new(
        name: String,
        entity_type: EntityType,
        email: Option<String>,
        role: Option<String>,
        organization: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let normalized_name = normalize_name(&name);
        Self {
            id: format!("ent_{}", Uuid::new_v4()),
            created_at: now,
            updated_at: now,
            name,
            normalized_name,
            entity_type,
            email,
            role,
            organization,
        }
    }

    pub async fn find_exact(
        db: &SurrealDbClient,
        normalized_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM entity
                 WHERE normalized_name = $name AND entity_type = $entity_type
                 LIMIT 1",
            )
            .bind(("name", normalized_name.to_owned()))
            .bind(("entity_type", entity_type.as_str().to_owned()))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// All entities of one type; the fuzzy matcher scans these.
    pub async fn list_of_type(
        db: &SurrealDbClient,
        entity_type: EntityType,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM entity WHERE entity_type = $entity_type")
            .bind(("entity_type", entity_type.as_str().to_owned()))
            .await?;

        Ok(response.take(0)?)
    }

    pub async fn get_by_ids(
        db: &SurrealDbClient,
        entity_ids: &[String],
    ) -> Result<Vec<Self>, AppError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query("SELECT * FROM entity WHERE record::id(id) IN $ids")
            .bind(("ids", entity_ids.to_vec()))
            .await?;

        Ok(response.take(0)?)
    }
}
