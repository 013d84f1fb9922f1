//! Ordering an offline product through the deferred engine.

use futures::future::BoxFuture;

use crate::deferred::{DeferredWorkflow, OperationKind, PollOutcome};
use crate::error::GatewayResult;
use crate::plugins::{DownloadContext, DownloadPlugin, OrderHandle, OrderTicket, TransferSource};

/// submit order → poll status → fetch the final transfer source.
pub(crate) struct OrderWorkflow<'a> {
    pub plugin: &'a dyn DownloadPlugin,
    pub ctx: &'a DownloadContext,
    pub ticket: &'a OrderTicket,
}

impl DeferredWorkflow for OrderWorkflow<'_> {
    type Handle = OrderHandle;
    type Output = TransferSource;

    fn kind(&self) -> OperationKind {
        OperationKind::DownloadOrder
    }

    fn provider(&self) -> &str {
        &self.ctx.provider
    }

    fn subject(&self) -> &str {
        &self.ticket.product_id
    }

    fn submit(&self) -> BoxFuture<'_, GatewayResult<OrderHandle>> {
        self.plugin.submit_order(self.ctx, self.ticket)
    }

    fn poll<'a>(&'a self, handle: &'a OrderHandle) -> BoxFuture<'a, GatewayResult<PollOutcome>> {
        self.plugin.poll_order(self.ctx, handle)
    }

    fn fetch<'a>(&'a self, handle: &'a OrderHandle) -> BoxFuture<'a, GatewayResult<TransferSource>> {
        self.plugin.fetch_order(self.ctx, handle)
    }
}
