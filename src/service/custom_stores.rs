use super::messages::*;
use super::KeyManagementService;
use crate::error::Result;
use crate::model::Principal;

impl KeyManagementService {
    pub fn create_custom_key_store(
        &self,
        _caller: &Principal,
        request: CreateCustomKeyStoreRequest,
    ) -> Result<CreateCustomKeyStoreResponse> {
        let custom_key_store_id = self.custom_stores.create(
            &request.custom_key_store_name,
            &request.cluster_id,
            &request.trust_anchor_certificate,
            &request.key_store_password,
            self.now(),
        )?;
        Ok(CreateCustomKeyStoreResponse {
            custom_key_store_id,
        })
    }

    pub fn describe_custom_key_stores(
        &self,
        _caller: &Principal,
        request: DescribeCustomKeyStoresRequest,
    ) -> Result<DescribeCustomKeyStoresResponse> {
        Ok(DescribeCustomKeyStoresResponse {
            custom_key_stores: self.custom_stores.describe(
                request.custom_key_store_id.as_deref(),
                request.custom_key_store_name.as_deref(),
            )?,
        })
    }

    /// Updates a disconnected store
    pub fn update_custom_key_store(
        &self,
        _caller: &Principal,
        request: UpdateCustomKeyStoreRequest,
    ) -> Result<()> {
        self.custom_stores.update(
            &request.custom_key_store_id,
            request.new_custom_key_store_name.as_deref(),
            request.key_store_password.as_ref().map(|p| p.as_str()),
            request.cluster_id.as_deref(),
        )
    }

    /// Connects a store; its keys return to the state they had before disconnecting
    pub fn connect_custom_key_store(
        &self,
        _caller: &Principal,
        request: CustomKeyStoreRequest,
    ) -> Result<()> {
        self.custom_stores
            .connect(&request.custom_key_store_id, &self.keys)
    }

    /// Disconnects a store; its keys become `Unavailable`
    pub fn disconnect_custom_key_store(
        &self,
        _caller: &Principal,
        request: CustomKeyStoreRequest,
    ) -> Result<()> {
        self.custom_stores
            .disconnect(&request.custom_key_store_id, &self.keys)
    }

    /// Deletes a disconnected store that holds no keys
    pub fn delete_custom_key_store(
        &self,
        _caller: &Principal,
        request: CustomKeyStoreRequest,
    ) -> Result<()> {
        self.custom_stores
            .delete(&request.custom_key_store_id, &self.keys)
    }
}
