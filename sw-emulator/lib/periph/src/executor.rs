/*++

Licensed under the Apache-2.0 license.

File Name:

    executor.rs

Abstract:

    File contains the program interpreter of an IDS engine. A program is a
    sequence of encoded instructions in system memory terminated by `Stop`.

--*/

use crate::system_memory::SystemMemory;
use c3_api::{CipherAlgorithm, CipherDirection, CipherMode, HashAlgorithm, Instr};
use c3_emu_bus::{Bus, BusError};
use c3_emu_crypto::{Aes, AesDirection, AesMode, HmacSha256, Sha256, AES_BLOCK_SIZE};
use c3_emu_types::{RvAddr, RvSize};
use rand::RngCore;

/// Programs that have not reached `Stop` after this many instructions fail.
pub const MAX_PROGRAM_INSTRUCTIONS: usize = 1024;

/// Longest instruction the decoder accepts, in words.
const MAX_INSTR_WORDS: usize = 16;

/// Why a program stopped before reaching `Stop`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Fault {
    /// Undecodable or unsupported instruction
    Error,

    /// Memory access to the given address failed
    Bus(RvAddr),

    /// Instruction needs a cipher or hash stream that was never started
    Channel,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExecOutcome {
    /// Address of the last instruction fetched
    pub current_ip: RvAddr,

    /// Instructions completed, `Stop` included
    pub executed: usize,

    /// Fault and the opcode of the faulting instruction
    pub fault: Option<(Fault, u8)>,
}

enum HashUnit {
    Sha256(Sha256),
    Hmac(HmacSha256),
}

/// Cipher and hash streams of one program.
#[derive(Default)]
struct Channel {
    cipher: Option<Aes>,
    hash: Option<HashUnit>,
}

// Zero-length transfers never touch memory.
fn read(mem: &SystemMemory, addr: RvAddr, len: u32) -> Result<Vec<u8>, Fault> {
    if len == 0 {
        return Ok(vec![]);
    }
    mem.read_vec(addr, len as usize).map_err(|_| Fault::Bus(addr))
}

fn write(mem: &mut SystemMemory, addr: RvAddr, data: &[u8]) -> Result<(), Fault> {
    if data.is_empty() {
        return Ok(());
    }
    mem.write_bytes(addr, data).map_err(|_| Fault::Bus(addr))
}

fn block(data: &[u8]) -> [u8; AES_BLOCK_SIZE] {
    let mut block = [0u8; AES_BLOCK_SIZE];
    block.copy_from_slice(&data[..AES_BLOCK_SIZE]);
    block
}

impl Channel {
    /// Executes one instruction. Returns true when the program is complete.
    fn step(
        &mut self,
        mem: &mut SystemMemory,
        rng: &mut impl RngCore,
        instr: &Instr,
    ) -> Result<bool, Fault> {
        match *instr {
            Instr::CipherStart {
                alg,
                mode,
                dir,
                key,
                key_len,
                iv,
                src,
                dst,
                len,
            } => {
                if alg != CipherAlgorithm::Aes {
                    Err(Fault::Error)?
                }
                let key = read(mem, key, key_len)?;
                let iv = match mode {
                    CipherMode::Cbc => block(&read(mem, iv, AES_BLOCK_SIZE as u32)?),
                    CipherMode::Ecb => [0; AES_BLOCK_SIZE],
                };
                let mode = match mode {
                    CipherMode::Ecb => AesMode::Ecb,
                    CipherMode::Cbc => AesMode::Cbc,
                };
                let dir = match dir {
                    CipherDirection::Encrypt => AesDirection::Encrypt,
                    CipherDirection::Decrypt => AesDirection::Decrypt,
                };
                let aes = Aes::new(&key, &iv, mode, dir).map_err(|_| Fault::Error)?;
                self.cipher = Some(aes);
                self.cipher_data(mem, src, dst, len)?;
            }
            Instr::CipherAppend { src, dst, len } => self.cipher_data(mem, src, dst, len)?,
            Instr::HashInit { alg, key, key_len } => {
                self.hash = Some(match alg {
                    HashAlgorithm::Sha256 => HashUnit::Sha256(Sha256::new()),
                    HashAlgorithm::HmacSha256 => {
                        HashUnit::Hmac(HmacSha256::new(&read(mem, key, key_len)?))
                    }
                    HashAlgorithm::Sha1 => Err(Fault::Error)?,
                });
            }
            Instr::HashAppend { src, len } => {
                let data = read(mem, src, len)?;
                match self.hash.as_mut().ok_or(Fault::Channel)? {
                    HashUnit::Sha256(sha) => sha.update(&data),
                    HashUnit::Hmac(hmac) => hmac.update(&data),
                }
            }
            Instr::HashEnd { digest } => {
                let hash = match self.hash.take().ok_or(Fault::Channel)? {
                    HashUnit::Sha256(sha) => sha.finalize(),
                    HashUnit::Hmac(hmac) => hmac.finalize(),
                };
                write(mem, digest, &hash)?;
            }
            Instr::PkaOp { .. } => Err(Fault::Error)?,
            Instr::Rng { dst, len } => {
                let mut data = vec![0u8; len as usize];
                rng.fill_bytes(&mut data);
                write(mem, dst, &data)?;
            }
            Instr::ContextSave { addr } => {
                let chain = self.cipher.as_ref().ok_or(Fault::Channel)?.chain_value();
                write(mem, addr, &chain)?;
            }
            Instr::ContextRestore { addr } => {
                let chain = block(&read(mem, addr, AES_BLOCK_SIZE as u32)?);
                self.cipher
                    .as_mut()
                    .ok_or(Fault::Channel)?
                    .set_chain_value(&chain);
            }
            Instr::Stop => return Ok(true),
        }
        Ok(false)
    }

    fn cipher_data(
        &mut self,
        mem: &mut SystemMemory,
        src: RvAddr,
        dst: RvAddr,
        len: u32,
    ) -> Result<(), Fault> {
        let cipher = self.cipher.as_mut().ok_or(Fault::Channel)?;
        let mut data = read(mem, src, len)?;
        cipher.process(&mut data).map_err(|_| Fault::Error)?;
        write(mem, dst, &data)
    }
}

/// Fetches and decodes the instruction at `ip`, returning it with its
/// length in words and its opcode.
fn fetch(mem: &mut SystemMemory, ip: RvAddr) -> Result<(Instr, usize, u8), (Fault, u8)> {
    let header = mem
        .read(RvSize::Word, ip)
        .map_err(|_: BusError| (Fault::Bus(ip), 0))?;
    let opcode = Instr::opcode_of(header);
    let words = (header & 0xffff) as usize;
    if words == 0 || words > MAX_INSTR_WORDS {
        Err((Fault::Error, opcode))?
    }
    let bytes = read(mem, ip, words as u32 * 4).map_err(|fault| (fault, opcode))?;
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let (instr, used) = Instr::decode(&words).map_err(|_| (Fault::Error, opcode))?;
    Ok((instr, used, opcode))
}

/// Counts the instructions of the program at `ip` without executing it.
/// Stops at the first instruction that cannot be fetched.
pub fn count_instructions(mem: &mut SystemMemory, mut ip: RvAddr) -> usize {
    let mut count = 0;
    while count < MAX_PROGRAM_INSTRUCTIONS {
        let Ok((instr, words, _)) = fetch(mem, ip) else {
            break;
        };
        count += 1;
        if instr == Instr::Stop {
            break;
        }
        ip = ip.wrapping_add(words as u32 * 4);
    }
    count.max(1)
}

/// Runs the program at `ip` to completion.
pub fn execute(mem: &mut SystemMemory, rng: &mut impl RngCore, mut ip: RvAddr) -> ExecOutcome {
    let mut channel = Channel::default();
    let mut executed = 0;
    while executed < MAX_PROGRAM_INSTRUCTIONS {
        let (instr, words, opcode) = match fetch(mem, ip) {
            Ok(fetched) => fetched,
            Err(fault) => {
                return ExecOutcome {
                    current_ip: ip,
                    executed,
                    fault: Some(fault),
                }
            }
        };
        match channel.step(mem, rng, &instr) {
            Ok(done) => {
                executed += 1;
                if done {
                    return ExecOutcome {
                        current_ip: ip,
                        executed,
                        fault: None,
                    };
                }
            }
            Err(fault) => {
                return ExecOutcome {
                    current_ip: ip,
                    executed,
                    fault: Some((fault, opcode)),
                }
            }
        }
        ip = ip.wrapping_add(words as u32 * 4);
    }
    ExecOutcome {
        current_ip: ip,
        executed,
        fault: Some((Fault::Error, 0)),
    }
}
