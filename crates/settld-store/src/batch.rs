//! Atomic multi-aggregate write batches
//!
//! Engines are pure: they compute next states and describe the writes as a
//! `WriteBatch`. The store applies the batch in one transaction, so
//! everything a business mutation touches (aggregates, chain appends,
//! outbox rows) commits or fails together.

use settld_types::*;

/// Which chained-event family a stream belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventScope {
    Run,
    Session,
    WorkOrder,
}

impl EventScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Session => "session",
            Self::WorkOrder => "work_order",
        }
    }
}

/// One write inside a batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutAgent(AgentIdentity),
    PutWallet(AgentWallet),
    PutGrant(Grant),
    PutRun(Run),
    /// Append with an optimistic head precondition. The expected previous
    /// chain hash must equal the stream head at commit time.
    AppendEvent {
        scope: EventScope,
        expected_prev: String,
        event: ChainedEvent,
    },
    PutSettlement(Settlement),
    PutDispute(Dispute),
    PutAgreement(ToolCallAgreement),
    PutEvidence(ToolCallEvidence),
    PutHold(FundingHold),
    PutCase(ArbitrationCase),
    PutSession(Session),
    PutWorkOrder(WorkOrder),
    PutReceipt(CompletionReceipt),
    PutAttestation(Attestation),
    PutAgentCard(AgentCard),
    PutGate(Gate),
    PutSignerKey(SignerKey),
    PutApiKey(ApiKey),
    PutKeyset(KeysetStore),
    /// Enqueue an outbox row; the store assigns the monotonic id
    Outbox(OutboxDraft),
    PutDelivery(DeliveryRecord),
}

/// An ordered list of writes applied atomically
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn put_agent(mut self, agent: AgentIdentity) -> Self {
        self.ops.push(WriteOp::PutAgent(agent));
        self
    }

    pub fn put_wallet(mut self, wallet: AgentWallet) -> Self {
        self.ops.push(WriteOp::PutWallet(wallet));
        self
    }

    pub fn put_grant(mut self, grant: Grant) -> Self {
        self.ops.push(WriteOp::PutGrant(grant));
        self
    }

    pub fn put_run(mut self, run: Run) -> Self {
        self.ops.push(WriteOp::PutRun(run));
        self
    }

    pub fn append_event(
        mut self,
        scope: EventScope,
        expected_prev: impl Into<String>,
        event: ChainedEvent,
    ) -> Self {
        self.ops.push(WriteOp::AppendEvent {
            scope,
            expected_prev: expected_prev.into(),
            event,
        });
        self
    }

    pub fn put_settlement(mut self, settlement: Settlement) -> Self {
        self.ops.push(WriteOp::PutSettlement(settlement));
        self
    }

    pub fn put_dispute(mut self, dispute: Dispute) -> Self {
        self.ops.push(WriteOp::PutDispute(dispute));
        self
    }

    pub fn put_agreement(mut self, agreement: ToolCallAgreement) -> Self {
        self.ops.push(WriteOp::PutAgreement(agreement));
        self
    }

    pub fn put_evidence(mut self, evidence: ToolCallEvidence) -> Self {
        self.ops.push(WriteOp::PutEvidence(evidence));
        self
    }

    pub fn put_hold(mut self, hold: FundingHold) -> Self {
        self.ops.push(WriteOp::PutHold(hold));
        self
    }

    pub fn put_case(mut self, case: ArbitrationCase) -> Self {
        self.ops.push(WriteOp::PutCase(case));
        self
    }

    pub fn put_session(mut self, session: Session) -> Self {
        self.ops.push(WriteOp::PutSession(session));
        self
    }

    pub fn put_work_order(mut self, work_order: WorkOrder) -> Self {
        self.ops.push(WriteOp::PutWorkOrder(work_order));
        self
    }

    pub fn put_receipt(mut self, receipt: CompletionReceipt) -> Self {
        self.ops.push(WriteOp::PutReceipt(receipt));
        self
    }

    pub fn put_attestation(mut self, attestation: Attestation) -> Self {
        self.ops.push(WriteOp::PutAttestation(attestation));
        self
    }

    pub fn put_agent_card(mut self, card: AgentCard) -> Self {
        self.ops.push(WriteOp::PutAgentCard(card));
        self
    }

    pub fn put_gate(mut self, gate: Gate) -> Self {
        self.ops.push(WriteOp::PutGate(gate));
        self
    }

    pub fn put_signer_key(mut self, key: SignerKey) -> Self {
        self.ops.push(WriteOp::PutSignerKey(key));
        self
    }

    pub fn put_api_key(mut self, key: ApiKey) -> Self {
        self.ops.push(WriteOp::PutApiKey(key));
        self
    }

    pub fn put_keyset(mut self, keyset: KeysetStore) -> Self {
        self.ops.push(WriteOp::PutKeyset(keyset));
        self
    }

    pub fn outbox(mut self, draft: OutboxDraft) -> Self {
        self.ops.push(WriteOp::Outbox(draft));
        self
    }

    pub fn put_delivery(mut self, record: DeliveryRecord) -> Self {
        self.ops.push(WriteOp::PutDelivery(record));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}
