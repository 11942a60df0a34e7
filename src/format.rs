/// `h:mm:ss` при наличии часов, иначе `mm:ss`
pub fn format_elapsed(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed_minutes_only() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(3599), "59:59");
    }

    #[test]
    fn test_format_elapsed_with_hours() {
        assert_eq!(format_elapsed(3600), "1:00:00");
        assert_eq!(format_elapsed(37_230), "10:20:30");
    }
}
