//! Server-side helpers shared by every managed table.

pub const UUID_EXTENSION: &str = "uuid-ossp";
pub const UNACCENT_EXTENSION: &str = "unaccent";

/// Channel change notifications are published on.
pub const CHANGE_CHANNEL: &str = "keystone_changes";

pub const NOTIFY_FUNCTION: &str = "keystone_notify_change";
pub const SLUGIFY_FUNCTION: &str = "keystone_slugify";
pub const SET_SLUG_FUNCTION: &str = "keystone_set_slug";

pub const CHANGE_EVENTS: &str = "AFTER INSERT OR UPDATE OR DELETE";
pub const SLUG_EVENTS: &str = "BEFORE INSERT";

// pg_notify rejects payloads of 8000 bytes or more
const MAX_PAYLOAD_BYTES: usize = 7900;

/// Publishes `{table, operation, id, old?, new?}` after each row change.
///
/// Row snapshots are dropped when they would push the payload over the
/// notification limit; `table`, `operation` and `id` are always sent.
pub fn notify_function_sql() -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {NOTIFY_FUNCTION}() RETURNS trigger AS $$
        DECLARE
            payload jsonb;
            row_id uuid;
        BEGIN
            IF TG_OP = 'DELETE' THEN
                row_id := OLD.id;
            ELSE
                row_id := NEW.id;
            END IF;
            payload := jsonb_build_object('table', TG_TABLE_NAME, 'operation', TG_OP, 'id', row_id);
            IF TG_OP <> 'INSERT' THEN
                payload := payload || jsonb_build_object('old', to_jsonb(OLD));
            END IF;
            IF TG_OP <> 'DELETE' THEN
                payload := payload || jsonb_build_object('new', to_jsonb(NEW));
            END IF;
            IF octet_length(payload::text) > {MAX_PAYLOAD_BYTES} THEN
                payload := payload - 'old' - 'new';
            END IF;
            PERFORM pg_notify('{CHANGE_CHANNEL}', payload::text);
            RETURN NULL;
        END;
        $$ LANGUAGE plpgsql"
    )
}

/// Lowercased, unaccented, runs outside `[a-z0-9_-]` collapsed to `-`, hyphens trimmed.
pub fn slugify_function_sql() -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {SLUGIFY_FUNCTION}(value text) RETURNS text AS $$
            SELECT trim(both '-' from regexp_replace(lower(unaccent(value)), '[^a-z0-9_-]+', '-', 'g'))
        $$ LANGUAGE sql STABLE STRICT"
    )
}

/// Fills an empty `slug` from `name` before insert.
pub fn set_slug_function_sql() -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {SET_SLUG_FUNCTION}() RETURNS trigger AS $$
        BEGIN
            IF (NEW.slug IS NULL OR NEW.slug = '') AND NEW.name IS NOT NULL THEN
                NEW.slug := {SLUGIFY_FUNCTION}(NEW.name);
            END IF;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_function() {
        let sql = notify_function_sql();
        assert!(sql.starts_with("CREATE OR REPLACE FUNCTION keystone_notify_change()"));
        assert!(sql.contains("pg_notify('keystone_changes', payload::text)"));
        assert!(sql.contains("> 7900"));
        assert!(sql.contains("RETURN NULL"));
    }

    #[test]
    fn test_slug_functions() {
        assert!(slugify_function_sql().contains("keystone_slugify(value text)"));
        let sql = set_slug_function_sql();
        assert!(sql.contains("NEW.slug := keystone_slugify(NEW.name)"));
    }
}
