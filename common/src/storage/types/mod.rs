use serde::{Deserialize, Serialize};
pub mod batch_job;
pub mod content_blob;
pub mod document;
pub mod embedding;
pub mod embedding_queue_item;
pub mod source;
pub mod sync_run;
pub mod system_settings;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Declare a persisted record type: a struct with `id`, `created_at` and
/// `updated_at` plus the listed fields, wired for SurrealDB round-trips
/// (record-id-or-string keys, `surrealdb::sql::Datetime` timestamps) and
/// implementing [`StoredObject`].
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),*}) => {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serialize};
        use $crate::storage::types::StoredObject;

        /// SurrealDB hands keys back as record ids; everything else in the
        /// codebase treats them as plain strings. Accept both.
        pub fn deserialize_record_key<'de, D>(deserializer: D) -> Result<String, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum RawKey {
                Text(String),
                Record(surrealdb::sql::Thing),
            }

            Ok(match RawKey::deserialize(deserializer)? {
                RawKey::Text(key) => key,
                RawKey::Record(thing) => thing.id.to_raw(),
            })
        }

        fn to_db_datetime<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            surrealdb::sql::Datetime::from(*date).serialize(serializer)
        }

        fn from_db_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            Ok(surrealdb::sql::Datetime::deserialize(deserializer)?.into())
        }

        #[allow(dead_code)]
        fn to_db_datetime_opt<S>(
            date: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            date.as_ref()
                .map(|dt| surrealdb::sql::Datetime::from(*dt))
                .serialize(serializer)
        }

        #[allow(dead_code)]
        fn from_db_datetime_opt<'de, D>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let value = Option::<surrealdb::sql::Datetime>::deserialize(deserializer)?;
            Ok(value.map(DateTime::<Utc>::from))
        }

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "deserialize_record_key")]
            pub id: String,
            #[serde(
                serialize_with = "to_db_datetime",
                deserialize_with = "from_db_datetime",
                default
            )]
            pub created_at: DateTime<Utc>,
            #[serde(
                serialize_with = "to_db_datetime",
                deserialize_with = "from_db_datetime",
                default
            )]
            pub updated_at: DateTime<Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}
