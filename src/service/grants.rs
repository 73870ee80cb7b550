use super::messages::*;
use super::KeyManagementService;
use crate::error::{Error, Result};
use crate::grant::{Grant, GrantOperation, GrantSelector, NewGrant};
use crate::model::{EncryptionContext, Principal};
use crate::util::Page;

impl KeyManagementService {
    /// Creates a grant on a key
    ///
    /// The caller must administer the key or hold a `CreateGrant` grant on it.
    pub fn create_grant(
        &self,
        caller: &Principal,
        request: CreateGrantRequest,
    ) -> Result<CreateGrantResponse> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::CreateGrant,
            &EncryptionContext::new(),
            &request.grant_tokens,
        )?;
        // the insert runs under the key's read lock so a concurrent sweep either
        // sees the grant and purges it, or has already removed the key
        let (grant_id, grant_token) = self.keys.with_key(&key_id, |record| {
            record.ensure_usable()?;
            self.grants.create(
                caller,
                NewGrant {
                    key_id: key_id.clone(),
                    grantee_principal: request.grantee_principal,
                    operations: request.operations,
                    constraints: request.constraints,
                    retiring_principal: request.retiring_principal,
                    name: request.name,
                },
                self.now(),
            )
        })?;
        Ok(CreateGrantResponse {
            grant_id,
            grant_token,
        })
    }

    /// Lists the grants on a key; administrators only
    pub fn list_grants(&self, caller: &Principal, request: ListGrantsRequest) -> Result<Page<Grant>> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.require_admin(caller, &key_id)?;
        self.grants.list_for_key(&key_id, &request.page)
    }

    /// Lists the grants a principal may retire; that principal or the account root only
    pub fn list_retirable_grants(
        &self,
        caller: &Principal,
        request: ListRetirableGrantsRequest,
    ) -> Result<Page<Grant>> {
        if *caller != request.retiring_principal && caller != self.root_principal() {
            return Err(Error::AccessDenied(format!(
                "{} may not list grants retirable by {}",
                caller, request.retiring_principal
            )));
        }
        self.grants
            .list_retirable(&request.retiring_principal, &request.page)
    }

    /// Retires a grant named by token, or by key and grant id
    pub fn retire_grant(&self, caller: &Principal, request: RetireGrantRequest) -> Result<()> {
        let selector = match (request.grant_token, request.key_id, request.grant_id) {
            (Some(token), None, None) => GrantSelector::Token(token),
            (None, Some(key_id), Some(grant_id)) => GrantSelector::Id {
                key_id: self.keys.resolve_key_only(&key_id)?,
                grant_id,
            },
            _ => {
                return Err(Error::Validation(
                    "name a grant by its token, or by key id and grant id".into(),
                ))
            }
        };
        self.grants.retire(caller, &selector)?;
        Ok(())
    }

    /// Revokes a grant; administrators only
    pub fn revoke_grant(&self, caller: &Principal, request: RevokeGrantRequest) -> Result<()> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.require_admin(caller, &key_id)?;
        self.grants.revoke(&key_id, &request.grant_id)?;
        Ok(())
    }
}
