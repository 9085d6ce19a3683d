//! Diesel schema for the task keyspace tables.

diesel::table! {
    /// Expiring string values keyed by logical key.
    task_store_values (key) {
        /// Logical key, for example `task:42`.
        key -> Text,
        /// Serialized value.
        payload -> Text,
        /// Instant after which the value is treated as absent.
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    /// One row per string set, holding the expiry of the whole set.
    task_store_sets (set_key) {
        /// Logical key of the set, for example `index:tasks`.
        set_key -> Text,
        /// Instant after which the set and its members are treated as absent.
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    /// Members of the sets in `task_store_sets`.
    task_store_set_members (set_key, member) {
        /// Logical key of the owning set.
        set_key -> Text,
        /// Set member.
        member -> Text,
    }
}

diesel::table! {
    /// Monotonic counters that never expire.
    task_store_counters (key) {
        /// Logical counter key.
        key -> Text,
        /// Last issued value.
        value -> Int8,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    task_store_values,
    task_store_sets,
    task_store_set_members,
    task_store_counters,
);
