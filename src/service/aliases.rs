use super::messages::*;
use super::KeyManagementService;
use crate::alias::Alias;
use crate::error::Result;
use crate::model::Principal;
use crate::util::Page;

impl KeyManagementService {
    /// Binds a new alias to a key the caller administers
    ///
    /// The target must be a key id or key ARN; aliases cannot point at aliases.
    /// The binding is made under the target's lock, so it never outlives a
    /// concurrent deletion of that key.
    pub fn create_alias(&self, caller: &Principal, request: AliasRequest) -> Result<()> {
        self.aliases.validate_name(&request.alias_name)?;
        let key_id = self.keys.resolve_key_only(&request.target_key_id)?;
        self.keys.with_key(&key_id, |record| {
            self.check_admin(caller, record)?;
            self.aliases
                .create(&request.alias_name, &key_id, self.now())?;
            Ok(())
        })
    }

    /// Points an alias at another key the caller administers
    pub fn update_alias(&self, caller: &Principal, request: AliasRequest) -> Result<()> {
        self.aliases.validate_name(&request.alias_name)?;
        let key_id = self.keys.resolve_key_only(&request.target_key_id)?;
        self.keys.with_key(&key_id, |record| {
            self.check_admin(caller, record)?;
            self.aliases
                .update(&request.alias_name, &key_id, self.now())
        })
    }

    /// Deletes an alias; the key it pointed to is unaffected
    pub fn delete_alias(&self, caller: &Principal, request: DeleteAliasRequest) -> Result<()> {
        self.aliases.validate_name(&request.alias_name)?;
        if let Some(key_id) = self.aliases.get(&request.alias_name)?.target_key_id {
            self.require_admin(caller, &key_id)?;
        }
        self.aliases.delete(&request.alias_name)?;
        Ok(())
    }

    /// Lists aliases ordered by name, optionally only those of one key
    pub fn list_aliases(&self, _caller: &Principal, request: ListAliasesRequest) -> Result<Page<Alias>> {
        let key_id = match &request.key_id {
            Some(reference) => Some(self.keys.resolve_key_only(reference)?),
            None => None,
        };
        self.aliases.list(key_id.as_deref(), &request.page)
    }
}
