//! User Service
//!
//! Entry point for user operations. Wraps the read-through store with
//! service-level traced operations so each request shows one service span
//! with store and cache spans beneath it.

use opentelemetry::KeyValue;
use tessel_core::{
    HealthCheck, NewUser, RequestContext, TesselError, TracedOperation, TracerHandle, User,
    UserId, UserUpdate,
};
use tessel_storage::CachedUserStore;

use crate::downstream::DownstreamClient;

/// Number sent to the downstream `calculate` call after a query.
const QUERY_CALCULATE_INPUT: i64 = 5;
/// Content sent to the downstream `process` call after a query.
const QUERY_PROCESS_INPUT: &str = "hello world";

fn id_attr(_: &RequestContext, id: &UserId) -> Vec<KeyValue> {
    vec![KeyValue::new("user.id", id.span_value())]
}

#[derive(Clone)]
struct Operations {
    get: TracedOperation<UserId, User, TesselError>,
    create: TracedOperation<NewUser, User, TesselError>,
    update: TracedOperation<UserUpdate, User, TesselError>,
    delete: TracedOperation<UserId, (), TesselError>,
    list: TracedOperation<(), Vec<User>, TesselError>,
}

impl Operations {
    fn wire(cached: &CachedUserStore, tracer: &TracerHandle) -> Self {
        let get = {
            let cached = cached.clone();
            TracedOperation::new("user_service.get", tracer.clone(), move |ctx: RequestContext, id: UserId| {
                let cached = cached.clone();
                async move { cached.get(&ctx, id).await }
            })
            .with_attributes(id_attr)
        };

        let create = {
            let cached = cached.clone();
            TracedOperation::new("user_service.create", tracer.clone(), move |ctx: RequestContext, new: NewUser| {
                let cached = cached.clone();
                async move { cached.create(&ctx, new).await }
            })
            .with_attributes(|_, new: &NewUser| vec![KeyValue::new("user.email", new.email.clone())])
        };

        let update = {
            let cached = cached.clone();
            TracedOperation::new("user_service.update", tracer.clone(), move |ctx: RequestContext, update: UserUpdate| {
                let cached = cached.clone();
                async move { cached.update(&ctx, update).await }
            })
            .with_attributes(|_, update: &UserUpdate| {
                vec![KeyValue::new("user.id", update.id.span_value())]
            })
        };

        let delete = {
            let cached = cached.clone();
            TracedOperation::new("user_service.delete", tracer.clone(), move |ctx: RequestContext, id: UserId| {
                let cached = cached.clone();
                async move { cached.soft_delete(&ctx, id).await }
            })
            .with_attributes(id_attr)
        };

        let list = {
            let cached = cached.clone();
            TracedOperation::new("user_service.list", tracer.clone(), move |ctx: RequestContext, (): ()| {
                let cached = cached.clone();
                async move { cached.list(&ctx).await }
            })
        };

        Self {
            get,
            create,
            update,
            delete,
            list,
        }
    }
}

/// User operations as seen by the HTTP layer.
#[derive(Clone)]
pub struct UserService {
    cached: CachedUserStore,
    downstream: Option<DownstreamClient>,
    ops: Operations,
}

impl UserService {
    pub fn new(cached: CachedUserStore, downstream: Option<DownstreamClient>, tracer: TracerHandle) -> Self {
        let ops = Operations::wire(&cached, &tracer);
        Self {
            cached,
            downstream,
            ops,
        }
    }

    /// The read-through store, for stats and draining.
    pub fn cached(&self) -> &CachedUserStore {
        &self.cached
    }

    pub fn has_downstream(&self) -> bool {
        self.downstream.is_some()
    }

    pub async fn get(&self, ctx: &RequestContext, id: UserId) -> Result<User, TesselError> {
        self.ops.get.call(ctx, id).await
    }

    /// Read a user, then notify the downstream service if one is configured.
    ///
    /// Downstream failures are logged and never affect the result.
    pub async fn query(&self, ctx: &RequestContext, id: UserId) -> Result<User, TesselError> {
        let user = self.get(ctx, id).await?;
        self.notify_downstream(ctx).await;
        Ok(user)
    }

    async fn notify_downstream(&self, ctx: &RequestContext) {
        let Some(downstream) = &self.downstream else {
            return;
        };
        let trace_id = ctx.trace_id().unwrap_or_default();

        match downstream.calculate(ctx, QUERY_CALCULATE_INPUT).await {
            Ok(data) => tracing::info!(trace_id = %trace_id, result = %data, "downstream calculate succeeded"),
            Err(error) => tracing::warn!(trace_id = %trace_id, error = %error, "downstream calculate failed"),
        }
        match downstream.process(ctx, QUERY_PROCESS_INPUT).await {
            Ok(data) => tracing::info!(trace_id = %trace_id, result = %data, "downstream process succeeded"),
            Err(error) => tracing::warn!(trace_id = %trace_id, error = %error, "downstream process failed"),
        }
    }

    pub async fn create(&self, ctx: &RequestContext, new: NewUser) -> Result<User, TesselError> {
        self.ops.create.call(ctx, new).await
    }

    pub async fn update(&self, ctx: &RequestContext, update: UserUpdate) -> Result<User, TesselError> {
        self.ops.update.call(ctx, update).await
    }

    pub async fn delete(&self, ctx: &RequestContext, id: UserId) -> Result<(), TesselError> {
        self.ops.delete.call(ctx, id).await
    }

    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<User>, TesselError> {
        self.ops.list.call(ctx, ()).await
    }

    pub async fn health(&self) -> Vec<HealthCheck> {
        self.cached.health().await
    }
}
