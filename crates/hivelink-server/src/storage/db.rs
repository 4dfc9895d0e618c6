//! SQLite database handle for the Hivelink server.

hivelink_core::define_database!(AppDatabase, "Hivelink database migrations complete");
