pub const ID_COLUMN: &str = "id";
pub const CREATED_DATE: &str = "created_date";
pub const UPDATED_DATE: &str = "updated_date";

/// Columns every table carries, managed by the server.
pub const AUDIT_COLUMNS: [&str; 3] = [ID_COLUMN, CREATED_DATE, UPDATED_DATE];

pub const SLUG_COLUMN: &str = "slug";
pub const NAME_COLUMN: &str = "name";

/// PostgreSQL truncates identifiers beyond this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Foreign,
    Unique,
    Index,
}

impl ConstraintKind {
    pub fn suffix(self) -> &'static str {
        match self {
            ConstraintKind::Foreign => "foreign",
            ConstraintKind::Unique => "unique",
            ConstraintKind::Index => "index",
        }
    }
}

/// Name of the constraint or index keystone creates for `column` of `table`.
///
/// The same name is generated at creation time and looked up in the live
/// catalog when diffing, so a constraint renamed outside keystone is invisible
/// to later reconciliation passes.
pub fn constraint_name(table: &str, column: &str, kind: ConstraintKind) -> String {
    format!("{}_{}_{}", table, column, kind.suffix()).to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// AFTER row trigger publishing change notifications.
    Change,
    /// BEFORE INSERT trigger deriving `slug` from `name`.
    Slug,
}

pub fn trigger_name(table: &str, kind: TriggerKind) -> String {
    let suffix = match kind {
        TriggerKind::Change => "notify",
        TriggerKind::Slug => "slug",
    };
    format!("{}_{}_trigger", table, suffix).to_lowercase()
}

pub fn is_audit_column(name: &str) -> bool {
    AUDIT_COLUMNS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_name_is_lowercased() {
        assert_eq!(
            constraint_name("tbl_User", "company_id", ConstraintKind::Foreign),
            "tbl_user_company_id_foreign"
        );
        assert_eq!(
            constraint_name("tbl_Company", "Name", ConstraintKind::Unique),
            "tbl_company_name_unique"
        );
        assert_eq!(
            constraint_name("tbl_User", "username", ConstraintKind::Index),
            "tbl_user_username_index"
        );
    }

    #[test]
    fn test_trigger_names() {
        assert_eq!(trigger_name("tbl_Post", TriggerKind::Change), "tbl_post_notify_trigger");
        assert_eq!(trigger_name("tbl_Post", TriggerKind::Slug), "tbl_post_slug_trigger");
    }

    #[test]
    fn test_audit_columns() {
        assert!(is_audit_column("id"));
        assert!(is_audit_column("updated_date"));
        assert!(!is_audit_column("slug"));
    }
}
