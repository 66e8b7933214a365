//! Host-side search with the same contract as the OpenCL kernel.

use crate::encoding::double_sha256;
use crate::error::DeviceError;
use crate::types::{HEADER_LEN, NONCE_POS, OUTPUT_LEN, TARGET_POS, WORK_HEADER_LEN};
use crate::worker::{Accelerator, ComputeDevice};

#[derive(Debug, Clone, Copy)]
pub struct CpuDevice {
    pub index: usize,
}

impl ComputeDevice for CpuDevice {
    type Accelerator = CpuExec;

    fn describe(&self) -> String {
        format!("CPU - host thread {}", self.index)
    }

    fn open(self, _global_item_size: usize) -> Result<CpuExec, DeviceError> {
        Ok(CpuExec {
            header: [0u8; WORK_HEADER_LEN],
            output: [0u8; OUTPUT_LEN],
        })
    }
}

pub struct CpuExec {
    header: [u8; WORK_HEADER_LEN],
    output: [u8; OUTPUT_LEN],
}

impl CpuExec {
    fn target_prefix(&self) -> u64 {
        let mut target = [0u8; 8];
        target.copy_from_slice(&self.header[TARGET_POS..WORK_HEADER_LEN]);
        u64::from_le_bytes(target)
    }
}

impl Accelerator for CpuExec {
    fn write_header(&mut self, header: &[u8]) -> Result<(), DeviceError> {
        if header.len() != WORK_HEADER_LEN {
            return Err(DeviceError::BufferSize {
                expected: WORK_HEADER_LEN,
                actual: header.len(),
            });
        }
        self.header.copy_from_slice(header);
        Ok(())
    }

    fn dispatch(&mut self, offset: u32, global_size: usize) -> Result<(), DeviceError> {
        let target = self.target_prefix();
        let mut candidate = [0u8; HEADER_LEN];
        candidate.copy_from_slice(&self.header[..HEADER_LEN]);

        let end = u64::from(offset) + global_size as u64;
        for nonce in u64::from(offset)..end.min(1 << 32) {
            let nonce = nonce as u32;
            candidate[NONCE_POS..HEADER_LEN].copy_from_slice(&nonce.to_le_bytes());
            let hash = double_sha256(&candidate);

            let mut top = [0u8; 8];
            top.copy_from_slice(&hash[24..32]);
            if u64::from_le_bytes(top) < target {
                self.output[..4].copy_from_slice(&1u32.to_le_bytes());
                self.output[4..].copy_from_slice(&nonce.to_le_bytes());
                break;
            }
        }
        Ok(())
    }

    fn read_output(&mut self) -> Result<[u8; OUTPUT_LEN], DeviceError> {
        Ok(self.output)
    }

    fn clear_output(&mut self) -> Result<(), DeviceError> {
        self.output = [0u8; OUTPUT_LEN];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::tests::GENESIS_HEADER_HEX;
    use crate::encoding::{bits_to_target, target_to_bytes};
    use crate::source::{DeprecationSignal, FetchedWork};
    use crate::types::{WorkTemplate, found_nonce};

    fn genesis_template() -> WorkTemplate<()> {
        let mut header = hex::decode(GENESIS_HEADER_HEX).unwrap();
        header[NONCE_POS..].copy_from_slice(&[0, 0, 0, 0]);
        let target = target_to_bytes(&bits_to_target(&0x1d00ffffu32.to_le_bytes()));
        WorkTemplate::new(
            0,
            FetchedWork {
                target: target.to_vec(),
                header,
                deprecation: DeprecationSignal::new(),
                job: (),
            },
        )
        .unwrap()
    }

    #[test]
    fn finds_genesis_nonce() {
        let template = genesis_template();
        let mut exec = CpuDevice { index: 0 }.open(16).unwrap();
        exec.write_header(template.header()).unwrap();
        exec.dispatch(0x7c2b_ac10, 16).unwrap();

        let output = exec.read_output().unwrap();
        assert_eq!(found_nonce(&output), Some([0x1d, 0xac, 0x2b, 0x7c]));

        exec.clear_output().unwrap();
        assert_eq!(found_nonce(&exec.read_output().unwrap()), None);
    }

    #[test]
    fn range_without_solution_reports_nothing() {
        let template = genesis_template();
        let mut exec = CpuDevice { index: 0 }.open(16).unwrap();
        exec.write_header(template.header()).unwrap();
        exec.dispatch(0x7c2b_ac20, 16).unwrap();
        assert_eq!(found_nonce(&exec.read_output().unwrap()), None);
    }

    #[test]
    fn rejects_short_header() {
        let mut exec = CpuDevice { index: 0 }.open(16).unwrap();
        assert!(matches!(
            exec.write_header(&[0u8; HEADER_LEN]),
            Err(DeviceError::BufferSize { expected: 88, actual: 80 })
        ));
    }
}
