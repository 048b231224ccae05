//! Process exit codes.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
pub const NOT_FOUND: u8 = 2;
pub const PERMISSION_DENIED: u8 = 3;
pub const CONNECTION_ERROR: u8 = 4;
pub const CONFIG_ERROR: u8 = 5;

pub fn from_errno(errno: i32) -> u8 {
    match errno {
        libc::ENOENT | libc::ENOTDIR | libc::ESTALE => NOT_FOUND,
        libc::EACCES | libc::EPERM => PERMISSION_DENIED,
        libc::ENOTCONN | libc::ESHUTDOWN | libc::ETIMEDOUT | libc::EIO => CONNECTION_ERROR,
        libc::EINVAL => CONFIG_ERROR,
        _ => GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errno() {
        assert_eq!(from_errno(libc::ENOENT), NOT_FOUND);
        assert_eq!(from_errno(libc::EACCES), PERMISSION_DENIED);
        assert_eq!(from_errno(libc::ENOTCONN), CONNECTION_ERROR);
        assert_eq!(from_errno(libc::EEXIST), GENERAL_ERROR);
    }
}
