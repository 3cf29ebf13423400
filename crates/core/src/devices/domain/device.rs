use std::fmt;

/// A compute device a job can run classification on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceHandle {
    /// GPU identifier as reported by the driver (usually an index).
    Gpu(String),
    /// The single synthetic CPU slot.
    Cpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Gpu,
    Cpu,
}

impl DeviceHandle {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceHandle::Gpu(_) => DeviceKind::Gpu,
            DeviceHandle::Cpu => DeviceKind::Cpu,
        }
    }

    /// Numeric GPU ordinal, when the identifier is one.
    pub fn gpu_index(&self) -> Option<i32> {
        match self {
            DeviceHandle::Gpu(id) => id.trim().parse().ok(),
            DeviceHandle::Cpu => None,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceHandle::Gpu(id) => write!(f, "gpu:{id}"),
            DeviceHandle::Cpu => write!(f, "cpu"),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gpu => write!(f, "gpu"),
            DeviceKind::Cpu => write!(f, "cpu"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(DeviceHandle::Gpu("1".into()).to_string(), "gpu:1");
        assert_eq!(DeviceHandle::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_gpu_index() {
        assert_eq!(DeviceHandle::Gpu("3".into()).gpu_index(), Some(3));
        assert_eq!(DeviceHandle::Gpu("GPU-8f2a".into()).gpu_index(), None);
        assert_eq!(DeviceHandle::Cpu.gpu_index(), None);
    }

    #[test]
    fn test_kind() {
        assert_eq!(DeviceHandle::Gpu("0".into()).kind(), DeviceKind::Gpu);
        assert_eq!(DeviceHandle::Cpu.kind(), DeviceKind::Cpu);
    }
}
