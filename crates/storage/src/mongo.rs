//! MongoDB device catalog

use crate::catalog::DeviceCatalog;
use crate::model::{CatalogEntry, DeviceDescriptor, SensorId};
use crate::StorageError;
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ReplaceOptions;
use mongodb::{Client, Collection, IndexModel};
use tracing::{debug, info};

/// Default database holding the catalog collection
pub const DEFAULT_DATABASE: &str = "MongoDB_";

/// Default catalog collection
pub const DEFAULT_COLLECTION: &str = "sensors";

/// Catalog backed by a MongoDB collection with a `2dsphere` index on `location`
#[derive(Clone)]
pub struct MongoCatalog {
    collection: Collection<CatalogEntry>,
}

impl MongoCatalog {
    /// Connect to `uri` and select `database.collection`
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self, StorageError> {
        info!("Connecting device catalog: {}/{}", database, collection);
        let client = Client::with_uri_str(uri).await?;
        Ok(Self::from_client(&client, database, collection))
    }

    /// Select a collection on an already connected client
    pub fn from_client(client: &Client, database: &str, collection: &str) -> Self {
        Self {
            collection: client.database(database).collection(collection),
        }
    }
}

#[async_trait]
impl DeviceCatalog for MongoCatalog {
    async fn upsert_descriptor(
        &self,
        sensor_id: SensorId,
        descriptor: &DeviceDescriptor,
        longitude: f64,
        latitude: f64,
    ) -> Result<(), StorageError> {
        let entry = CatalogEntry::new(sensor_id, descriptor.clone(), longitude, latitude);
        let options = ReplaceOptions::builder().upsert(true).build();

        self.collection
            .replace_one(doc! { "id_sensor": sensor_id }, &entry, options)
            .await?;

        debug!("Upserted catalog entry for sensor {}", sensor_id);
        Ok(())
    }

    async fn ensure_geo_index(&self) -> Result<(), StorageError> {
        let index = IndexModel::builder()
            .keys(doc! { "location": "2dsphere" })
            .build();
        // Creating an index that already exists is a no-op on the server
        self.collection.create_index(index, None).await?;
        Ok(())
    }

    async fn find_near(
        &self,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> Result<Vec<CatalogEntry>, StorageError> {
        let filter = doc! {
            "location": {
                "$near": {
                    "$geometry": {
                        "type": "Point",
                        "coordinates": [longitude, latitude],
                    },
                    "$maxDistance": radius_m,
                }
            }
        };

        let mut cursor = self.collection.find(filter, None).await?;
        let mut entries = Vec::new();
        while cursor.advance().await? {
            entries.push(cursor.deserialize_current()?);
        }

        debug!("Catalog proximity query matched {} entries", entries.len());
        Ok(entries)
    }

    async fn find_by_sensor_id(&self, sensor_id: SensorId) -> Result<Option<CatalogEntry>, StorageError> {
        let entry = self
            .collection
            .find_one(doc! { "id_sensor": sensor_id }, None)
            .await?;
        Ok(entry)
    }

    async fn delete_by_sensor_id(&self, sensor_id: SensorId) -> Result<(), StorageError> {
        let result = self
            .collection
            .delete_one(doc! { "id_sensor": sensor_id }, None)
            .await?;
        debug!("Deleted {} catalog entries for sensor {}", result.deleted_count, sensor_id);
        Ok(())
    }
}
