use super::messages::*;
use super::KeyManagementService;
use crate::error::{Error, Result};
use crate::grant::GrantOperation;
use crate::key::store::{KeyListEntry, NewKey};
use crate::key::{KeySpec, KeyUsage, Origin};
use crate::model::{EncryptionContext, Principal};
use crate::util::Page;

impl KeyManagementService {
    /// Creates a key owned by `caller`
    pub fn create_key(
        &self,
        caller: &Principal,
        request: CreateKeyRequest,
    ) -> Result<KeyMetadataResponse> {
        let key_usage = request.key_usage.unwrap_or(KeyUsage::EncryptDecrypt);
        let key_spec = request.key_spec.unwrap_or(match key_usage {
            KeyUsage::EncryptDecrypt => KeySpec::SymmetricDefault,
            KeyUsage::SignVerify => KeySpec::Rsa2048,
        });
        let origin = request.origin.unwrap_or(if request.custom_key_store_id.is_some() {
            Origin::CustomStore
        } else {
            Origin::Native
        });

        let new = NewKey {
            owner: caller.clone(),
            description: request.description.unwrap_or_default(),
            origin,
            key_usage,
            key_spec,
            policy: request.policy,
            tags: request.tags,
            custom_key_store_id: request.custom_key_store_id,
        };

        let now = self.now();
        let key_metadata = match new.custom_key_store_id.clone() {
            Some(store_id) if origin == Origin::CustomStore => self
                .custom_stores
                .with_connected(&store_id, || self.keys.create_key(new, now))?,
            _ => self.keys.create_key(new, now)?,
        };
        Ok(KeyMetadataResponse { key_metadata })
    }

    /// Describes a key; alias names and ARNs are resolved
    pub fn describe_key(
        &self,
        caller: &Principal,
        request: DescribeKeyRequest,
    ) -> Result<KeyMetadataResponse> {
        let key_id = self.resolve(&request.key_id)?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::DescribeKey,
            &EncryptionContext::new(),
            &request.grant_tokens,
        )?;
        Ok(KeyMetadataResponse {
            key_metadata: self.keys.describe(&key_id)?,
        })
    }

    /// Lists every key of the account in creation order
    pub fn list_keys(&self, _caller: &Principal, request: ListRequest) -> Result<Page<KeyListEntry>> {
        self.keys.list_keys(&request.page)
    }

    /// Resolves a key reference and checks that `caller` administers it
    fn admin_key(&self, caller: &Principal, reference: &str) -> Result<String> {
        let key_id = self.resolve(reference)?;
        self.require_admin(caller, &key_id)?;
        Ok(key_id)
    }

    pub fn update_key_description(
        &self,
        caller: &Principal,
        request: UpdateKeyDescriptionRequest,
    ) -> Result<()> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        self.keys.update_description(&key_id, request.description)
    }

    pub fn enable_key(&self, caller: &Principal, request: KeyRequest) -> Result<()> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        self.keys.enable_key(&key_id)
    }

    pub fn disable_key(&self, caller: &Principal, request: KeyRequest) -> Result<()> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        self.keys.disable_key(&key_id)
    }

    /// Schedules a key for deletion after its waiting period
    pub fn schedule_key_deletion(
        &self,
        caller: &Principal,
        request: ScheduleKeyDeletionRequest,
    ) -> Result<ScheduleKeyDeletionResponse> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        let days = request
            .pending_window_in_days
            .unwrap_or(self.config.default_deletion_window_days);

        let deletion_date = self.keys.schedule_deletion(&key_id, days, self.now())?;
        let key_metadata = self.keys.describe(&key_id)?;
        Ok(ScheduleKeyDeletionResponse {
            key_id: key_metadata.arn,
            deletion_date,
            key_state: key_metadata.key_state,
            pending_window_in_days: days,
        })
    }

    /// Cancels a scheduled deletion; the key comes back disabled
    pub fn cancel_key_deletion(
        &self,
        caller: &Principal,
        request: KeyRequest,
    ) -> Result<CancelKeyDeletionResponse> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        let key_state = self.keys.cancel_deletion(&key_id)?;
        Ok(CancelKeyDeletionResponse {
            key_id: self.keys.scope().key_arn(&key_id),
            key_state,
        })
    }

    pub fn enable_key_rotation(&self, caller: &Principal, request: KeyRequest) -> Result<()> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        self.keys.enable_rotation(&key_id, self.now())
    }

    pub fn disable_key_rotation(&self, caller: &Principal, request: KeyRequest) -> Result<()> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        self.keys.disable_rotation(&key_id)
    }

    pub fn get_key_rotation_status(
        &self,
        caller: &Principal,
        request: KeyRequest,
    ) -> Result<GetKeyRotationStatusResponse> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        Ok(GetKeyRotationStatusResponse {
            key_rotation_enabled: self.keys.rotation_status(&key_id)?,
        })
    }

    pub fn get_key_policy(
        &self,
        caller: &Principal,
        request: GetKeyPolicyRequest,
    ) -> Result<GetKeyPolicyResponse> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        Ok(GetKeyPolicyResponse {
            policy: self.keys.policy(&key_id, &request.policy_name)?,
        })
    }

    pub fn put_key_policy(&self, caller: &Principal, request: PutKeyPolicyRequest) -> Result<()> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        self.keys
            .put_policy(&key_id, &request.policy_name, request.policy)
    }

    pub fn list_key_policies(
        &self,
        caller: &Principal,
        request: KeyRequest,
    ) -> Result<ListKeyPoliciesResponse> {
        let key_id = self.admin_key(caller, &request.key_id)?;
        Ok(ListKeyPoliciesResponse {
            policy_names: self.keys.list_policies(&key_id)?,
        })
    }

    /// Adds or overwrites tags; tags can only be set through a key id or key ARN
    pub fn tag_resource(&self, caller: &Principal, request: TagResourceRequest) -> Result<()> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.require_admin(caller, &key_id)?;
        if request.tags.is_empty() {
            return Err(Error::Validation("at least one tag is required".into()));
        }
        self.keys.tag(&key_id, &request.tags)
    }

    pub fn untag_resource(&self, caller: &Principal, request: UntagResourceRequest) -> Result<()> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.require_admin(caller, &key_id)?;
        self.keys.untag(&key_id, &request.tag_keys)
    }

    pub fn list_resource_tags(
        &self,
        caller: &Principal,
        request: KeyRequest,
    ) -> Result<ListResourceTagsResponse> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.require_admin(caller, &key_id)?;
        Ok(ListResourceTagsResponse {
            tags: self.keys.tags(&key_id)?,
        })
    }
}
