//! TCP gateway exposing a [`Bus`] to other processes.
//!
//! Each connection gets a reader loop and a writer task. Responses and
//! subscription frames share one outgoing queue, so a frame is never
//! interleaved with another.

use std::net::SocketAddr;

use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bus::{Bus, Publish};
use crate::error::BusError;
use crate::framing::{read_message, write_message};
use crate::msg::{Empty, JointCommand, JointState};
use crate::protocol::{Request, Response, JOINT_COMMANDS_TOPIC, JOINT_STATES_TOPIC};

/// Outgoing frames buffered per connection.
const OUTGOING_QUEUE: usize = 64;

/// Listening gateway.
pub struct Gateway {
    bus: Bus,
    listener: TcpListener,
}

impl Gateway {
    /// Bind to `addr` (e.g. `"127.0.0.1:11411"`).
    pub async fn bind(bus: Bus, addr: &str) -> Result<Self, BusError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { bus, listener })
    }

    /// The address the gateway is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` turns true.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        info!("gateway listening on {}", self.local_addr()?);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!("gateway client {peer} connected");
                    let bus = self.bus.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(bus, stream).await {
                            warn!("gateway client {peer}: {e}");
                        }
                        debug!("gateway client {peer} disconnected");
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("gateway stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_connection(bus: Bus, stream: TcpStream) -> Result<(), BusError> {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel::<Response>(OUTGOING_QUEUE);
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let commands = bus.advertise::<JointCommand>(JOINT_COMMANDS_TOPIC)?;
    let mut forwarders = Vec::new();

    let result = loop {
        let request: Request = match read_message(&mut reader).await {
            Ok(Some(req)) => req,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let response = match request {
            Request::Call { service } => {
                let bus = bus.clone();
                // Handlers may block on the simulation lock.
                match tokio::task::spawn_blocking(move || bus.call_service(&service, Empty {})).await {
                    Ok(Ok(_)) => Response::Ack,
                    Ok(Err(e)) => Response::error(e),
                    Err(e) => Response::error(e),
                }
            }
            Request::Subscribe { topic } if topic == JOINT_STATES_TOPIC => {
                match bus.subscribe::<JointState>(&topic) {
                    Ok(mut sub) => {
                        let tx = tx.clone();
                        forwarders.push(tokio::spawn(async move {
                            while let Ok(state) = sub.recv().await {
                                if tx.send(Response::JointState(state)).await.is_err() {
                                    break;
                                }
                            }
                        }));
                        Response::Ack
                    }
                    Err(e) => Response::error(e),
                }
            }
            Request::Subscribe { topic } => Response::error(format!("cannot subscribe to {topic}")),
            Request::PublishCommand(cmd) => match commands.publish(cmd) {
                Ok(()) => Response::Ack,
                Err(e) => Response::error(e),
            },
            Request::ListServices => Response::Services {
                names: bus.services(),
            },
        };

        if tx.send(response).await.is_err() {
            break Ok(());
        }
    };

    for forwarder in forwarders {
        forwarder.abort();
    }
    drop(tx);
    let _ = writer_task.await;
    result
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<Response>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_message(&mut writer, &frame).await {
            debug!("gateway write failed: {e}");
            break;
        }
    }
}
