// Databases owned by the server itself; never part of a backup.
pub const SYSTEM_DATABASES: &[&str] = &[
    "information_schema",
    "performance_schema",
    "mysql",
    "sys",
];

pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES.contains(&name)
}
