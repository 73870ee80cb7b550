use super::messages::*;
use super::KeyManagementService;
use crate::error::Result;
use crate::key::ExpirationModel;
use crate::lifecycle::ImportParameters;
use crate::model::Principal;

impl KeyManagementService {
    /// Issues a wrapping key and import token for an External key
    pub fn get_parameters_for_import(
        &self,
        caller: &Principal,
        request: GetParametersForImportRequest,
    ) -> Result<ImportParameters> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.require_admin(caller, &key_id)?;
        self.scheduler.get_parameters_for_import(
            &self.keys,
            &key_id,
            request.wrapping_algorithm,
            request.wrapping_key_spec,
            self.now(),
        )
    }

    /// Imports wrapped key material into a PendingImport key
    pub fn import_key_material(
        &self,
        caller: &Principal,
        request: ImportKeyMaterialRequest,
    ) -> Result<()> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.require_admin(caller, &key_id)?;

        let expiration_model = request.expiration_model.unwrap_or(match request.valid_to {
            Some(_) => ExpirationModel::KeyMaterialExpires,
            None => ExpirationModel::KeyMaterialDoesNotExpire,
        });
        self.scheduler.import_key_material(
            &self.keys,
            &key_id,
            &request.encrypted_key_material,
            &request.import_token,
            expiration_model,
            request.valid_to,
            self.now(),
        )
    }

    /// Deletes the imported material of an External key
    pub fn delete_imported_key_material(&self, caller: &Principal, request: KeyRequest) -> Result<()> {
        let key_id = self.keys.resolve_key_only(&request.key_id)?;
        self.require_admin(caller, &key_id)?;
        self.keys.delete_imported_material(&key_id)?;
        Ok(())
    }
}
