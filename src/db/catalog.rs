//! Built-in migration catalogue and routine definitions for the Atelier
//! schema (SQLite-first dialect).
//!
//! The catalogue is append-only: new schema changes get a new version at the
//! end, shipped migrations are never edited.

use crate::db::local::Routine;
use crate::db::migrations::{Migration, MigrationRegistry};

/// Core tables: projects, pages, elements, design_themes, design_tokens.
const BASE_SCHEMA: &str = r#"
-- ---------------------------------------------------------------------------
-- Projects
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    created_by TEXT NULL,
    domain TEXT NULL,
    created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

-- ---------------------------------------------------------------------------
-- Pages (one slug per project)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pages (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    order_num INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE(project_id, slug)
);

CREATE INDEX IF NOT EXISTS idx_pages_project_id ON pages(project_id);

-- ---------------------------------------------------------------------------
-- Elements (tree per page; props/data_binding hold JSON text)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS elements (
    id TEXT PRIMARY KEY NOT NULL,
    page_id TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    parent_id TEXT NULL REFERENCES elements(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    props TEXT NOT NULL DEFAULT '{}',
    order_num INTEGER NOT NULL DEFAULT 0,
    data_binding TEXT NULL,
    created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_elements_page_id ON elements(page_id);
CREATE INDEX IF NOT EXISTS idx_elements_parent_id ON elements(parent_id);
CREATE INDEX IF NOT EXISTS idx_elements_order_num ON elements(order_num);

-- ---------------------------------------------------------------------------
-- Design themes (inheritance via parent_theme_id)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS design_themes (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    parent_theme_id TEXT NULL REFERENCES design_themes(id) ON DELETE SET NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE(project_id, name)
);

CREATE INDEX IF NOT EXISTS idx_design_themes_project_id ON design_themes(project_id);

-- ---------------------------------------------------------------------------
-- Design tokens (value holds JSON text)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS design_tokens (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    theme_id TEXT NOT NULL REFERENCES design_themes(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    value TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT 'raw',
    alias_of TEXT NULL,
    css_variable TEXT NULL,
    created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE(project_id, theme_id, name, scope)
);

CREATE INDEX IF NOT EXISTS idx_design_tokens_project_id ON design_tokens(project_id);
CREATE INDEX IF NOT EXISTS idx_design_tokens_theme_id ON design_tokens(theme_id);
CREATE INDEX IF NOT EXISTS idx_design_tokens_name ON design_tokens(name);

-- ---------------------------------------------------------------------------
-- updated_at triggers
-- ---------------------------------------------------------------------------
CREATE TRIGGER IF NOT EXISTS trg_projects_updated_at
AFTER UPDATE ON projects
FOR EACH ROW
BEGIN
    UPDATE projects SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS trg_pages_updated_at
AFTER UPDATE ON pages
FOR EACH ROW
BEGIN
    UPDATE pages SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS trg_elements_updated_at
AFTER UPDATE ON elements
FOR EACH ROW
BEGIN
    UPDATE elements SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS trg_design_themes_updated_at
AFTER UPDATE ON design_themes
FOR EACH ROW
BEGIN
    UPDATE design_themes SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS trg_design_tokens_updated_at
AFTER UPDATE ON design_tokens
FOR EACH ROW
BEGIN
    UPDATE design_tokens SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = NEW.id;
END;
"#;

/// User-assigned element ids (for event wiring, selectors, testing).
const ADD_CUSTOM_ID: &str = r#"
ALTER TABLE elements ADD COLUMN custom_id TEXT;

CREATE INDEX IF NOT EXISTS idx_elements_custom_id ON elements(custom_id);
"#;

/// Token inheritance resolution: walks the theme's parent chain (bounded at
/// depth 10) and keeps the nearest definition of each (name, scope).
const RESOLVE_THEME_TOKENS: &str = r#"
WITH RECURSIVE theme_hierarchy(id, parent_theme_id, depth) AS (
    SELECT dt.id, dt.parent_theme_id, 0
    FROM design_themes dt
    WHERE dt.id = ?1

    UNION ALL

    SELECT dt.id, dt.parent_theme_id, th.depth + 1
    FROM design_themes dt
    INNER JOIN theme_hierarchy th ON dt.id = th.parent_theme_id
    WHERE th.depth < 10
),
ranked AS (
    SELECT
        t.id, t.theme_id, t.project_id, t.name, t.type, t.value, t.scope,
        t.alias_of, t.css_variable, t.created_at, t.updated_at,
        th.depth AS inheritance_depth,
        ROW_NUMBER() OVER (PARTITION BY t.name, t.scope ORDER BY th.depth ASC) AS rn
    FROM theme_hierarchy th
    INNER JOIN design_tokens t ON t.theme_id = th.id
)
SELECT
    id, theme_id, project_id, name, type, value, scope, alias_of, css_variable,
    theme_id AS source_theme_id,
    (theme_id != ?1) AS is_inherited,
    inheritance_depth, created_at, updated_at
FROM ranked
WHERE rn = 1
ORDER BY name, scope
"#;

/// The migration catalogue shipped with the application, in application order.
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: "20250101_000000".to_string(),
            name: "base_schema".to_string(),
            sql: BASE_SCHEMA.to_string(),
        },
        Migration {
            version: "20250129_000000".to_string(),
            name: "add_custom_id_to_elements".to_string(),
            sql: ADD_CUSTOM_ID.to_string(),
        },
    ]
}

/// Registry over [`migrations`]. The catalogue is known-ordered, so this
/// cannot fail.
pub fn default_registry() -> MigrationRegistry {
    MigrationRegistry::new(migrations()).expect("built-in catalogue is ordered")
}

/// Routines the embedded engine registers by default. The cloud backend keeps
/// its counterparts server-side; both are reached through `rpc`.
pub fn default_routines() -> Vec<Routine> {
    vec![Routine {
        name: "resolve_theme_tokens".to_string(),
        args: vec!["theme_id".to_string()],
        sql: RESOLVE_THEME_TOKENS.to_string(),
    }]
}
