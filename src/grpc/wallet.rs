use std::time::Instant;

use tonic::{Request, Response, Status};

use crate::application::WalletService;
use crate::grpc::reply;
use crate::proto::v1 as pb;

pub struct WalletHandler {
    svc: WalletService,
}

impl WalletHandler {
    pub fn new(svc: WalletService) -> Self {
        Self { svc }
    }
}

#[tonic::async_trait]
impl pb::wallet_service_server::WalletService for WalletHandler {
    async fn init_wallet(
        &self,
        request: Request<pb::InitWalletRequest>,
    ) -> Result<Response<pb::InitWalletReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        if req.mnemonic.trim().is_empty() {
            return Err(Status::invalid_argument("mnemonic is required"));
        }
        if req.passphrase.is_empty() {
            return Err(Status::invalid_argument("passphrase is required"));
        }
        let result = self
            .svc
            .init_or_restore_wallet(req.mnemonic.trim(), &req.passphrase)
            .map(|()| pb::InitWalletReply {});
        reply("InitWallet", started, result)
    }

    async fn unlock_wallet(
        &self,
        request: Request<pb::UnlockWalletRequest>,
    ) -> Result<Response<pb::UnlockWalletReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let result = self
            .svc
            .unlock_wallet(&req.passphrase)
            .map(|()| pb::UnlockWalletReply {});
        reply("UnlockWallet", started, result)
    }

    async fn lock_wallet(
        &self,
        _request: Request<pb::LockWalletRequest>,
    ) -> Result<Response<pb::LockWalletReply>, Status> {
        let started = Instant::now();
        let result = self.svc.lock_wallet().map(|()| pb::LockWalletReply {});
        reply("LockWallet", started, result)
    }
}
