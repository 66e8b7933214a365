use ocl::enums::{KernelWorkGroupInfo, KernelWorkGroupInfoResult};
use ocl::{Buffer, Context, Device, Kernel, MemFlags, Platform, Program, Queue, flags};

use crate::cl_kernels::NONCE_GRIND;
use crate::error::DeviceError;
use crate::types::{OUTPUT_LEN, WORK_HEADER_LEN};
use crate::worker::{Accelerator, ComputeDevice};

/// Found flag and nonce.
const OUTPUT_WORDS: usize = OUTPUT_LEN / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Gpu,
    Cpu,
    All,
}

impl DeviceKind {
    fn flags(self) -> flags::DeviceType {
        match self {
            DeviceKind::Gpu => flags::DEVICE_TYPE_GPU,
            DeviceKind::Cpu => flags::DEVICE_TYPE_CPU,
            DeviceKind::All => flags::DEVICE_TYPE_ALL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClDevice {
    platform: Platform,
    device: Device,
}

/// Lists the devices of `kind` on the platform at `platform_index`.
pub fn list_devices(platform_index: usize, kind: DeviceKind) -> Result<Vec<ClDevice>, DeviceError> {
    let platforms = Platform::list();
    let platform = *platforms.get(platform_index).ok_or_else(|| {
        DeviceError::Init(format!(
            "OpenCL platform {platform_index} not found ({} available)",
            platforms.len()
        ))
    })?;
    let devices = Device::list(platform, Some(kind.flags()))?;
    if devices.is_empty() {
        return Err(DeviceError::NoDevices);
    }
    Ok(devices
        .into_iter()
        .map(|device| ClDevice { platform, device })
        .collect())
}

impl ComputeDevice for ClDevice {
    type Accelerator = ClSession;

    fn describe(&self) -> String {
        let name = self.device.name().unwrap_or_else(|_| "unknown".into());
        let vendor = self.device.vendor().unwrap_or_else(|_| "unknown".into());
        format!("{vendor} - {name}")
    }

    fn open(self, global_item_size: usize) -> Result<ClSession, DeviceError> {
        let context = Context::builder()
            .platform(self.platform)
            .devices(self.device)
            .build()?;
        let queue = Queue::new(&context, self.device, None)?;
        let program = Program::builder()
            .src(NONCE_GRIND)
            .devices(self.device)
            .build(&context)?;

        let header = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_only())
            .len(WORK_HEADER_LEN)
            .build()?;
        let output = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_write())
            .len(OUTPUT_WORDS)
            .fill_val(0u32)
            .build()?;

        let kernel = Kernel::builder()
            .program(&program)
            .name("nonce_grind")
            .queue(queue.clone())
            .global_work_size(global_item_size)
            .arg(&header)
            .arg(&output)
            .build()?;

        let group_info = kernel
            .wg_info(self.device, KernelWorkGroupInfo::WorkGroupSize)
            .map_err(ocl::Error::from)?;
        let max_group = match group_info {
            KernelWorkGroupInfoResult::WorkGroupSize(size) => size,
            other => {
                return Err(DeviceError::Init(format!(
                    "unexpected work group info: {other:?}"
                )));
            }
        };
        let local_item_size = local_size(max_group, global_item_size);
        tracing::debug!(max_group, local_item_size, "work group size");

        Ok(ClSession {
            queue,
            kernel,
            header,
            output,
            local_item_size,
            _program: program,
            _context: context,
        })
    }
}

/// Largest power of two not above the device maximum or the global size.
fn local_size(max_group: usize, global_item_size: usize) -> usize {
    let limit = max_group.min(global_item_size).max(1);
    1 << (usize::BITS - 1 - limit.leading_zeros())
}

pub struct ClSession {
    queue: Queue,
    kernel: Kernel,
    header: Buffer<u8>,
    output: Buffer<u32>,
    local_item_size: usize,
    _program: Program,
    _context: Context,
}

impl Accelerator for ClSession {
    fn write_header(&mut self, header: &[u8]) -> Result<(), DeviceError> {
        if header.len() != WORK_HEADER_LEN {
            return Err(DeviceError::BufferSize {
                expected: WORK_HEADER_LEN,
                actual: header.len(),
            });
        }
        self.header.write(header).enq()?;
        Ok(())
    }

    fn dispatch(&mut self, offset: u32, global_size: usize) -> Result<(), DeviceError> {
        unsafe {
            self.kernel
                .cmd()
                .global_work_offset(offset as usize)
                .global_work_size(global_size)
                .local_work_size(self.local_item_size)
                .enq()?;
        }
        self.queue.finish()?;
        Ok(())
    }

    fn read_output(&mut self) -> Result<[u8; OUTPUT_LEN], DeviceError> {
        let mut words = [0u32; OUTPUT_WORDS];
        self.output.read(&mut words[..]).enq()?;
        let mut out = [0u8; OUTPUT_LEN];
        out[..4].copy_from_slice(&words[0].to_le_bytes());
        out[4..].copy_from_slice(&words[1].to_le_bytes());
        Ok(out)
    }

    fn clear_output(&mut self) -> Result<(), DeviceError> {
        self.output.write(&[0u32; OUTPUT_WORDS][..]).enq()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_size_is_power_of_two_within_limits() {
        assert_eq!(local_size(256, 1 << 20), 256);
        assert_eq!(local_size(1024, 16), 16);
        assert_eq!(local_size(300, 1 << 20), 256);
        assert_eq!(local_size(0, 1 << 20), 1);
    }
}
