/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! State repository layer that traces every call.
//!
//! Each call is logged at trace level through the [`ContextLogger`](crate::logging::ContextLogger) of
//! the round currently executing, as `stateRepository#<method>` followed by the call's parameters and
//! either its response or its error. The wrapped repository's result is returned unchanged.

use std::fmt::Debug;

use crate::{
    block_execution::ExecutionScope,
    state_transition::StateTransitionExecutionContext,
    types::{
        data_types::{BlockHeight, CoreHeight, CryptoHash, Identifier, PubKeyHash, Timestamp},
        platform_state::{DataContract, Document, Identity},
    },
};

use super::{StateRepository, StateRepositoryError};

pub struct LoggedStateRepository<S: StateRepository> {
    inner: S,
    scope: ExecutionScope,
}

impl<S: StateRepository> LoggedStateRepository<S> {
    pub fn new(inner: S, scope: ExecutionScope) -> LoggedStateRepository<S> {
        LoggedStateRepository { inner, scope }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn log_call<P: Debug, T: Debug>(
        &self,
        method: &str,
        parameters: P,
        result: Result<T, StateRepositoryError>,
    ) -> Result<T, StateRepositoryError> {
        let logger = self.scope.logger();
        match &result {
            Ok(response) => logger.trace(format_args!(
                "stateRepository#{}, parameters: {:?}, response: {:?}",
                method, parameters, response
            )),
            Err(err) => logger.trace(format_args!(
                "stateRepository#{}, parameters: {:?}, error: {}",
                method, parameters, err
            )),
        }
        result
    }
}

impl<S: StateRepository> StateRepository for LoggedStateRepository<S> {
    fn fetch_identity(
        &self,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Identity>, StateRepositoryError> {
        let result = self.inner.fetch_identity(id, execution_context);
        self.log_call("fetchIdentity", id, result)
    }

    fn create_identity(
        &self,
        identity: &Identity,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        let result = self.inner.create_identity(identity, execution_context);
        self.log_call("createIdentity", identity, result)
    }

    fn update_identity(
        &self,
        identity: &Identity,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        let result = self.inner.update_identity(identity, execution_context);
        self.log_call("updateIdentity", identity, result)
    }

    fn fetch_identity_id_by_public_key_hash(
        &self,
        hash: &PubKeyHash,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Identifier>, StateRepositoryError> {
        let result = self
            .inner
            .fetch_identity_id_by_public_key_hash(hash, execution_context);
        self.log_call("fetchIdentityIdByPublicKeyHash", hash, result)
    }

    fn fetch_data_contract(
        &self,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<DataContract>, StateRepositoryError> {
        let result = self.inner.fetch_data_contract(id, execution_context);
        self.log_call("fetchDataContract", id, result)
    }

    fn create_data_contract(
        &self,
        data_contract: &DataContract,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        let result = self
            .inner
            .create_data_contract(data_contract, execution_context);
        self.log_call("createDataContract", data_contract, result)
    }

    fn update_data_contract(
        &self,
        data_contract: &DataContract,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        let result = self
            .inner
            .update_data_contract(data_contract, execution_context);
        self.log_call("updateDataContract", data_contract, result)
    }

    fn fetch_document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Document>, StateRepositoryError> {
        let result = self
            .inner
            .fetch_document(data_contract_id, id, execution_context);
        self.log_call("fetchDocument", (data_contract_id, id), result)
    }

    fn fetch_documents_by_owner(
        &self,
        data_contract_id: &Identifier,
        document_type: &str,
        owner_id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Vec<Document>, StateRepositoryError> {
        let result = self.inner.fetch_documents_by_owner(
            data_contract_id,
            document_type,
            owner_id,
            execution_context,
        );
        self.log_call(
            "fetchDocumentsByOwner",
            (data_contract_id, document_type, owner_id),
            result,
        )
    }

    fn create_document(
        &self,
        document: &Document,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        let result = self.inner.create_document(document, execution_context);
        self.log_call("createDocument", document, result)
    }

    fn update_document(
        &self,
        document: &Document,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        let result = self.inner.update_document(document, execution_context);
        self.log_call("updateDocument", document, result)
    }

    fn remove_document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        let result = self
            .inner
            .remove_document(data_contract_id, id, execution_context);
        self.log_call("removeDocument", (data_contract_id, id), result)
    }

    fn fetch_transaction(&self, id: &CryptoHash) -> Result<Option<Vec<u8>>, StateRepositoryError> {
        let result = self.inner.fetch_transaction(id);
        self.log_call("fetchTransaction", id, result)
    }

    fn fetch_latest_platform_block_height(&self) -> Result<BlockHeight, StateRepositoryError> {
        let result = self.inner.fetch_latest_platform_block_height();
        self.log_call("fetchLatestPlatformBlockHeight", (), result)
    }

    fn fetch_latest_platform_block_time(&self) -> Result<Timestamp, StateRepositoryError> {
        let result = self.inner.fetch_latest_platform_block_time();
        self.log_call("fetchLatestPlatformBlockTime", (), result)
    }

    fn fetch_latest_platform_core_chain_locked_height(
        &self,
    ) -> Result<CoreHeight, StateRepositoryError> {
        let result = self.inner.fetch_latest_platform_core_chain_locked_height();
        self.log_call("fetchLatestPlatformCoreChainLockedHeight", (), result)
    }
}
