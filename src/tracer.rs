//! Modbus RTU connection to a Tracer controller.
use crate::{
    error::{Error, Result},
    registers::{RegisterClient, RegisterKind},
};
use async_trait::async_trait;
use std::{future::Future, io, time::Duration};
use tokio::time::timeout;
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

pub struct Con {
    ctx: client::Context,
    timeout: Duration,
}

impl Con {
    /// Open `device` with the Tracer's fixed line settings (8N1) and talk to
    /// `slave`. Every request is abandoned after `timeout`.
    pub fn connect(device: &str, baud_rate: u32, slave: u8, timeout: Duration) -> Result<Con> {
        let builder = tokio_serial::new(device, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout);
        let port = SerialStream::open(&builder).map_err(io::Error::from)?;
        Ok(Con {
            ctx: rtu::attach_slave(port, Slave(slave)),
            timeout,
        })
    }
}

async fn request<T, F>(limit: Duration, address: u16, f: F) -> Result<T>
where
    F: Future<Output = tokio_modbus::Result<T>>,
{
    match timeout(limit, f).await {
        Err(_) => Err(Error::Timeout {
            address,
            after: limit,
        }),
        Ok(Err(tokio_modbus::Error::Transport(e))) => Err(Error::Transport(e)),
        Ok(Err(tokio_modbus::Error::Protocol(e))) => Err(Error::Protocol {
            address,
            reason: e.to_string(),
        }),
        Ok(Ok(Err(exception))) => Err(Error::Protocol {
            address,
            reason: format!("exception {:?}", exception),
        }),
        Ok(Ok(Ok(v))) => Ok(v),
    }
}

#[async_trait]
impl RegisterClient for Con {
    async fn read_block(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let limit = self.timeout;
        let ctx = &mut self.ctx;
        let words = match kind {
            RegisterKind::Input => {
                request(limit, address, ctx.read_input_registers(address, count)).await?
            }
            RegisterKind::Holding => {
                request(limit, address, ctx.read_holding_registers(address, count)).await?
            }
            RegisterKind::Coil => request(limit, address, ctx.read_coils(address, count))
                .await?
                .into_iter()
                .map(u16::from)
                .collect(),
        };
        Ok(words)
    }

    async fn write_single(&mut self, kind: RegisterKind, address: u16, value: u16) -> Result<()> {
        let limit = self.timeout;
        let ctx = &mut self.ctx;
        match kind {
            RegisterKind::Coil => {
                request(limit, address, ctx.write_single_coil(address, value != 0)).await
            }
            RegisterKind::Holding => {
                request(limit, address, ctx.write_single_register(address, value)).await
            }
            RegisterKind::Input => Err(Error::Protocol {
                address,
                reason: "input registers are read only".to_owned(),
            }),
        }
    }
}
