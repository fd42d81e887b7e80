//! tonic binding of the authorization RPC.
//!
//! Translates `arbiter.auth.v1.AuthService` requests into [`Gateway`] calls and
//! gateway errors into gRPC status codes.
use crate::errors::{Error, ErrorKind};
use crate::gateway::{AccessRequest, Gateway, ThingRef};
use crate::model::{Connection, EntityInfo};
use arbiter_authz::ChannelPermission;
use arbiter_wire::auth::v1::auth_service_server::{AuthService, AuthServiceServer};
use arbiter_wire::auth::v1::{
    AuthorizeReq, AuthorizeRes, ConnectionsReq, ConnectionsRes, EntityBasic, IdentifyReq,
    IdentifyRes, RetrieveEntitiesReq, RetrieveEntitiesRes, RetrieveEntityReq, RetrieveEntityRes,
};
use std::future::Future;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

pub struct AuthGrpcService {
    gateway: Gateway,
}

impl AuthGrpcService {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn into_server(self) -> AuthServiceServer<Self> {
        AuthServiceServer::new(self)
    }
}

pub fn status_from_error(err: Error) -> Status {
    let message = err.to_string();
    match err.kind() {
        ErrorKind::Authentication => Status::unauthenticated(message),
        ErrorKind::Authorization => Status::permission_denied(message),
        ErrorKind::NotFound => Status::not_found(message),
        ErrorKind::MalformedEntity => Status::invalid_argument(message),
        ErrorKind::Conflict => Status::already_exists(message),
        ErrorKind::GroupNotEmpty | ErrorKind::Internal => {
            tracing::error!(error = ?err, "authorization rpc failed");
            Status::internal(message)
        }
    }
}

fn entity_basic(info: EntityInfo) -> EntityBasic {
    EntityBasic {
        id: info.id,
        domain_id: info.domain_id,
        kind: info.kind.as_str().to_string(),
        status: info.status.as_str().to_string(),
    }
}

fn connections_from_wire(req: ConnectionsReq) -> Vec<Connection> {
    req.connections
        .into_iter()
        .map(|conn| Connection {
            thing_id: conn.thing_id,
            channel_id: conn.channel_id,
            domain_id: conn.domain_id,
        })
        .collect()
}

#[tonic::async_trait]
impl AuthService for AuthGrpcService {
    async fn authorize(
        &self,
        request: Request<AuthorizeReq>,
    ) -> Result<Response<AuthorizeRes>, Status> {
        let req = request.into_inner();
        let permission: ChannelPermission = req
            .permission
            .parse()
            .map_err(|err: arbiter_authz::AuthzError| Status::invalid_argument(err.to_string()))?;
        let thing = match (req.thing_id.is_empty(), req.thing_key.is_empty()) {
            (false, true) => ThingRef::Id(req.thing_id),
            (true, false) => ThingRef::Key(req.thing_key),
            _ => {
                return Err(Status::invalid_argument(
                    "exactly one of thing_id and thing_key must be set",
                ));
            }
        };
        let access = AccessRequest {
            channel_id: req.channel_id,
            thing,
            permission,
        };
        match self.gateway.authorize(&access).await {
            Ok(id) => Ok(Response::new(AuthorizeRes {
                authorized: true,
                id,
            })),
            Err(err) => Err(status_from_error(err)),
        }
    }

    async fn identify(
        &self,
        request: Request<IdentifyReq>,
    ) -> Result<Response<IdentifyRes>, Status> {
        let id = self
            .gateway
            .identify(&request.into_inner().thing_key)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(IdentifyRes { id }))
    }

    async fn retrieve_entity(
        &self,
        request: Request<RetrieveEntityReq>,
    ) -> Result<Response<RetrieveEntityRes>, Status> {
        let info = self
            .gateway
            .retrieve_entity(&request.into_inner().id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(RetrieveEntityRes {
            entity: Some(entity_basic(info)),
        }))
    }

    async fn retrieve_entities(
        &self,
        request: Request<RetrieveEntitiesReq>,
    ) -> Result<Response<RetrieveEntitiesRes>, Status> {
        let ids = request.into_inner().ids;
        let entities = self
            .gateway
            .retrieve_entities(&ids)
            .await
            .map_err(status_from_error)?;
        let total = entities.len() as u64;
        Ok(Response::new(RetrieveEntitiesRes {
            total,
            limit: total,
            offset: 0,
            entities: entities.into_iter().map(entity_basic).collect(),
        }))
    }

    async fn add_connections(
        &self,
        request: Request<ConnectionsReq>,
    ) -> Result<Response<ConnectionsRes>, Status> {
        let connections = connections_from_wire(request.into_inner());
        self.gateway
            .add_connections(&connections)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(ConnectionsRes { ok: true }))
    }

    async fn remove_connections(
        &self,
        request: Request<ConnectionsReq>,
    ) -> Result<Response<ConnectionsRes>, Status> {
        let connections = connections_from_wire(request.into_inner());
        self.gateway
            .remove_connections(&connections)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(ConnectionsRes { ok: true }))
    }
}

/// Serves the authorization RPC on `listener` until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    gateway: Gateway,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "authorization gRPC listening");
    Server::builder()
        .add_service(AuthGrpcService::new(gateway).into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;
    tracing::info!("authorization gRPC stopped");
    Ok(())
}
