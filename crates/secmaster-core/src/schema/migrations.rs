/// A schema migration.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATION_001: &str = r#"
-- Logical objects. AUTOINCREMENT guarantees an object id is never reused,
-- even after every row of the object is gone.
CREATE TABLE IF NOT EXISTS sec_object (
    doc_oid INTEGER PRIMARY KEY AUTOINCREMENT,
    created_instant INTEGER NOT NULL
);

-- Bitemporal history, one row per (object, version, correction).
-- Instants are microseconds since the Unix epoch; NULL means open.
CREATE TABLE IF NOT EXISTS sec_document (
    doc_oid INTEGER NOT NULL REFERENCES sec_object(doc_oid),
    ver_num INTEGER NOT NULL CHECK (ver_num >= 0),
    corr_num INTEGER NOT NULL CHECK (corr_num >= 0),
    ver_from_instant INTEGER NOT NULL,
    ver_to_instant INTEGER,
    corr_from_instant INTEGER NOT NULL,
    corr_to_instant INTEGER,
    name TEXT NOT NULL,
    -- name folded to lower case by the application for wildcard search
    name_key TEXT NOT NULL,
    sec_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (doc_oid, ver_num, corr_num),
    CHECK (ver_to_instant IS NULL OR ver_from_instant <= ver_to_instant),
    CHECK (corr_to_instant IS NULL OR corr_from_instant <= corr_to_instant),
    CHECK (corr_from_instant >= ver_from_instant)
);

-- Open-row lookups
CREATE INDEX IF NOT EXISTS ix_sec_document_ver_to
    ON sec_document(doc_oid, ver_to_instant);
CREATE INDEX IF NOT EXISTS ix_sec_document_corr_to
    ON sec_document(doc_oid, ver_num, corr_to_instant);

-- At most one current row per object, one open correction per version
CREATE UNIQUE INDEX IF NOT EXISTS ux_sec_document_current
    ON sec_document(doc_oid)
    WHERE ver_to_instant IS NULL AND corr_to_instant IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_sec_document_open_correction
    ON sec_document(doc_oid, ver_num)
    WHERE corr_to_instant IS NULL;

-- Point-in-time search
CREATE INDEX IF NOT EXISTS ix_sec_document_ver_from
    ON sec_document(ver_from_instant, ver_to_instant);
CREATE INDEX IF NOT EXISTS ix_sec_document_name ON sec_document(name_key);
CREATE INDEX IF NOT EXISTS ix_sec_document_type ON sec_document(sec_type);

-- External identifiers of each row
CREATE TABLE IF NOT EXISTS sec_idkey (
    doc_oid INTEGER NOT NULL,
    ver_num INTEGER NOT NULL,
    corr_num INTEGER NOT NULL,
    key_scheme TEXT NOT NULL,
    key_value TEXT NOT NULL,
    key_value_key TEXT NOT NULL,
    PRIMARY KEY (doc_oid, ver_num, corr_num, key_scheme, key_value),
    FOREIGN KEY (doc_oid, ver_num, corr_num)
        REFERENCES sec_document(doc_oid, ver_num, corr_num)
);

CREATE INDEX IF NOT EXISTS ix_sec_idkey_key ON sec_idkey(key_scheme, key_value);
"#;

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "bitemporal_security_schema",
    sql: MIGRATION_001,
}];
