//! Sort whitelists
//!
//! Client-supplied `sort_by`/`order` values are looked up here and only the
//! static column names below ever reach SQL text. Anything unknown falls
//! back to the entity's default.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortEntity {
    Files,
    Logs,
    Apps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// A resolved, safe sort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub column: &'static str,
    pub direction: Direction,
}

const FILE_COLUMNS: &[&str] = &["created_at", "name", "size"];
const LOG_COLUMNS: &[&str] = &["timestamp", "file_id", "action", "ip", "user_agent"];
const APP_COLUMNS: &[&str] = &["created_at", "name", "client_id"];

impl SortEntity {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            SortEntity::Files => FILE_COLUMNS,
            SortEntity::Logs => LOG_COLUMNS,
            SortEntity::Apps => APP_COLUMNS,
        }
    }

    pub fn default_column(&self) -> &'static str {
        self.columns()[0]
    }
}

/// Resolve raw client input. Never fails.
pub fn resolve(entity: SortEntity, sort_by: Option<&str>, order: Option<&str>) -> Sort {
    let requested = sort_by.map(str::trim).unwrap_or_default();
    let column = entity
        .columns()
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(requested))
        .unwrap_or_else(|| {
            if !requested.is_empty() {
                tracing::debug!(sort_by = requested, "sort column not allowed, using default");
            }
            entity.default_column()
        });

    let direction = match order.map(str::trim) {
        Some(o) if o.eq_ignore_ascii_case("asc") => Direction::Asc,
        _ => Direction::Desc,
    };

    Sort { column, direction }
}

impl Sort {
    /// `ORDER BY` body with an `id` tie-break so pages are stable.
    pub fn order_by(&self, table_alias: &str) -> String {
        format!(
            "{table_alias}.{col} {dir}, {table_alias}.id {dir}",
            col = self.column,
            dir = self.direction.as_sql()
        )
    }
}
