use crate::controllers::motor_hat::{Command, HatError, Message};
use std::future::Future;
use log::error;
use tokio::sync::{mpsc, oneshot};

pub trait SendRecv {
    fn get_sender(&self) -> &mpsc::Sender<Message>;
    fn get_channel(&self) -> u8;
    fn write(&self, command: Command) -> impl Future<Output = Result<(), HatError>> + Send
    where
        Self: Sync,
    {
        async move {
            let (resp_tx, resp_rx) = oneshot::channel();
            let msg = Message {
                channel: self.get_channel(),
                command,
                response: resp_tx,
            };
            if let Err(e) = self.get_sender().send(msg).await {
                error!("Hat client gone, dropping {:?}", e.0.command);
                return Err(HatError::Disconnected);
            }
            match resp_rx.await {
                Ok(result) => result,
                Err(_) => Err(HatError::Disconnected),
            }
        }
    }
}
