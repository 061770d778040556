//! Modbus TCP device simulator for integration tests.
//!
//! Emulates one digital I/O controller: 8 input coils at 0x0000 and 8
//! output coils at 0x0010, both readable with FC 0x01, outputs writable
//! with FC 0x05. Counts accepted connections and served requests so
//! tests can assert on session reuse and poll traffic.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const INPUT_BASE: u16 = 0x0000;
const OUTPUT_BASE: u16 = 0x0010;

#[derive(Default)]
struct CoilBanks {
    inputs: [bool; 8],
    outputs: [bool; 8],
}

pub struct DeviceSimulator {
    addr: SocketAddr,
    banks: Arc<Mutex<CoilBanks>>,
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

impl DeviceSimulator {
    /// Bind to an ephemeral local port and start serving
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind simulator");
        let addr = listener.local_addr().expect("simulator addr");
        let banks = Arc::new(Mutex::new(CoilBanks::default()));
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));

        {
            let banks = banks.clone();
            let connections = connections.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    let banks = banks.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let _ = serve_client(stream, banks, requests).await;
                    });
                }
            });
        }

        Self {
            addr,
            banks,
            connections,
            requests,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn set_input(&self, number: usize, state: bool) {
        self.banks.lock().inputs[number] = state;
    }

    pub fn output(&self, number: usize) -> bool {
        self.banks.lock().outputs[number]
    }

    /// Connections accepted since start
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Modbus requests served since start
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn serve_client(
    mut stream: TcpStream,
    banks: Arc<Mutex<CoilBanks>>,
    requests: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(()); // peer closed
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let unit_id = header[6];
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        stream.read_exact(&mut pdu).await?;
        requests.fetch_add(1, Ordering::SeqCst);

        let response = handle_pdu(&banks, &pdu);
        let mut frame = Vec::with_capacity(7 + response.len());
        frame.extend_from_slice(&header[0..4]); // txn + protocol id
        frame.extend_from_slice(&((response.len() as u16 + 1).to_be_bytes()));
        frame.push(unit_id);
        frame.extend_from_slice(&response);
        stream.write_all(&frame).await?;
    }
}

fn handle_pdu(banks: &Mutex<CoilBanks>, pdu: &[u8]) -> Vec<u8> {
    if pdu.is_empty() {
        return vec![0x80, 0x01];
    }
    let fc = pdu[0];
    match fc {
        // Read coils
        0x01 if pdu.len() >= 5 => {
            let address = u16::from_be_bytes([pdu[1], pdu[2]]);
            let quantity = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
            let banks = banks.lock();
            let bank = if address >= OUTPUT_BASE {
                (&banks.outputs, (address - OUTPUT_BASE) as usize)
            } else {
                (&banks.inputs, (address - INPUT_BASE) as usize)
            };
            let (coils, offset) = bank;
            if offset + quantity > coils.len() {
                return vec![fc | 0x80, 0x02]; // illegal data address
            }
            let byte_count = quantity.div_ceil(8);
            let mut data = vec![0u8; byte_count];
            for i in 0..quantity {
                if coils[offset + i] {
                    data[i / 8] |= 1 << (i % 8);
                }
            }
            let mut response = vec![fc, byte_count as u8];
            response.extend_from_slice(&data);
            response
        }
        // Write single coil
        0x05 if pdu.len() >= 5 => {
            let address = u16::from_be_bytes([pdu[1], pdu[2]]);
            let value = u16::from_be_bytes([pdu[3], pdu[4]]);
            let state = match value {
                0xFF00 => true,
                0x0000 => false,
                _ => return vec![fc | 0x80, 0x03], // illegal data value
            };
            let offset = address.wrapping_sub(OUTPUT_BASE) as usize;
            let mut banks = banks.lock();
            if address < OUTPUT_BASE || offset >= banks.outputs.len() {
                return vec![fc | 0x80, 0x02];
            }
            banks.outputs[offset] = state;
            pdu[0..5].to_vec() // echo
        }
        _ => vec![fc | 0x80, 0x01], // illegal function
    }
}
