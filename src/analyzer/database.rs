//! Database usage detection
//!
//! Two signals: dependency names matched against a driver table, and keyword
//! presence in `.env` and configuration files (connection URLs, host
//! variables).

use crate::error::Result;
use std::collections::BTreeSet;
use std::path::Path;

/// Driver and client library table, keyed by dependency name fragment.
const DATABASE_DEPENDENCIES: &[(&str, &str)] = &[
    ("pg", "postgresql"),
    ("postgres", "postgresql"),
    ("psycopg", "postgresql"),
    ("postgresql", "postgresql"),
    ("mysql", "mysql"),
    ("mysql2", "mysql"),
    ("mariadb", "mariadb"),
    ("mongodb", "mongodb"),
    ("mongoose", "mongodb"),
    ("pymongo", "mongodb"),
    ("redis", "redis"),
    ("ioredis", "redis"),
    ("sqlite3", "sqlite"),
    ("better-sqlite3", "sqlite"),
    ("rusqlite", "sqlite"),
    ("cassandra-driver", "cassandra"),
    ("elasticsearch", "elasticsearch"),
    ("go-redis", "redis"),
    ("go-sql-driver/mysql", "mysql"),
    ("lib/pq", "postgresql"),
    ("jackc/pgx", "postgresql"),
    ("spring-boot-starter-data-jpa", "relational"),
    ("spring-boot-starter-data-mongodb", "mongodb"),
    ("spring-boot-starter-data-redis", "redis"),
];

/// Environment/config keywords that imply a database.
const CONFIG_KEYWORDS: &[(&str, &str)] = &[
    ("postgres://", "postgresql"),
    ("postgresql://", "postgresql"),
    ("POSTGRES_", "postgresql"),
    ("mysql://", "mysql"),
    ("MYSQL_", "mysql"),
    ("mongodb://", "mongodb"),
    ("mongodb+srv://", "mongodb"),
    ("MONGO_", "mongodb"),
    ("redis://", "redis"),
    ("REDIS_", "redis"),
    ("DATABASE_URL", "relational"),
];

const SCANNED_FILES: &[&str] = &[
    ".env",
    ".env.local",
    ".env.example",
    "config.yaml",
    "config.yml",
    "application.properties",
    "application.yml",
    "src/main/resources/application.properties",
    "src/main/resources/application.yml",
    "docker-compose.yml",
    "docker-compose.yaml",
];

/// Match dependency names against the driver table.
pub fn detect_from_dependencies(dependencies: &[String]) -> Vec<String> {
    let mut found = BTreeSet::new();
    // exact match first so `pg` does not fire on `pg-promise-helpers` alone
    for (fragment, database) in DATABASE_DEPENDENCIES {
        if dependencies.iter().any(|d| d == fragment) {
            found.insert(database.to_string());
        }
    }
    for (fragment, database) in DATABASE_DEPENDENCIES {
        if fragment.len() > 4 && dependencies.iter().any(|d| d.contains(fragment)) {
            found.insert(database.to_string());
        }
    }
    found.into_iter().collect()
}

/// Scan `.env` and config files for database keywords.
pub fn detect_from_config_files(root: &Path) -> Result<Vec<String>> {
    let mut found = BTreeSet::new();
    for file in SCANNED_FILES {
        if let Some(content) = super::read_capped(&root.join(file)) {
            for (keyword, database) in CONFIG_KEYWORDS {
                if content.contains(keyword) {
                    found.insert(database.to_string());
                }
            }
        }
    }
    Ok(found.into_iter().collect())
}
