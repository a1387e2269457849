use crate::constants::ENVIRON_PREFIX;
use crate::knowledge_base::KnowledgeBase;

/// Expand Windows-style environment variables (%VAR%) from the knowledge
/// base. `%SystemRoot%` is looked up as `environ_systemroot`; unknown
/// variables are left as they are.
pub fn expand_windows_env_vars(path: &str, kb: &KnowledgeBase) -> String {
    let mut result = String::with_capacity(path.len());
    let mut rest = path;

    // Scan forward only, so a value containing %VAR% is never expanded again
    while let Some(start) = rest.find('%') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('%') else {
            break;
        };
        let var_name = &after[..end];

        result.push_str(&rest[..start]);
        let lookup = format!("{}{}", ENVIRON_PREFIX, var_name.to_lowercase());
        match kb.get_values(&lookup).filter(|_| is_var_name(var_name)) {
            Some(values) => {
                result.push_str(&values[0]);
                rest = &after[end + 1..];
            }
            None => {
                // Keep the opening % and retry from the closing one
                result.push('%');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '(' || c == ')')
}

/// Normalize path separators for the target OS
pub fn normalize_path_for_os(path: &str, os: &str) -> String {
    if os == "Windows" {
        path.replace('/', "\\")
    } else {
        path.replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge_base::AttributeValue;

    fn windows_kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::with_os("Windows");
        kb.set_attribute("environ_systemroot", "C:\\Windows".into());
        kb.set_attribute("environ_programfiles", "C:\\Program Files".into());
        kb
    }

    #[test]
    fn test_expand_windows_env_vars_basic() {
        let kb = windows_kb();
        assert_eq!(expand_windows_env_vars("%SystemRoot%", &kb), "C:\\Windows");
        assert_eq!(
            expand_windows_env_vars("%SYSTEMROOT%\\System32\\config", &kb),
            "C:\\Windows\\System32\\config"
        );
    }

    #[test]
    fn test_expand_windows_env_vars_multiple() {
        let kb = windows_kb();
        assert_eq!(
            expand_windows_env_vars("%ProgramFiles%\\x;%SystemRoot%\\y", &kb),
            "C:\\Program Files\\x;C:\\Windows\\y"
        );
    }

    #[test]
    fn test_expand_windows_env_vars_nonexistent() {
        let kb = windows_kb();
        assert_eq!(
            expand_windows_env_vars("%DOESNOTEXIST%\\file.txt", &kb),
            "%DOESNOTEXIST%\\file.txt"
        );
        assert_eq!(
            expand_windows_env_vars("100% of %SystemRoot%", &kb),
            "100% of C:\\Windows"
        );
    }

    #[test]
    fn test_expand_windows_env_vars_malformed() {
        let kb = windows_kb();
        assert_eq!(expand_windows_env_vars("%INCOMPLETE", &kb), "%INCOMPLETE");
        assert_eq!(expand_windows_env_vars("%%", &kb), "%%");
        assert_eq!(expand_windows_env_vars("%", &kb), "%");
    }

    #[test]
    fn test_self_referencing_value_terminates() {
        let mut kb = KnowledgeBase::with_os("Windows");
        kb.set_attribute("environ_loop", AttributeValue::Text("%LOOP%".to_string()));
        assert_eq!(expand_windows_env_vars("%LOOP%\\x", &kb), "%LOOP%\\x");
    }

    #[test]
    fn test_normalize_path_for_os() {
        assert_eq!(normalize_path_for_os("C:/Users/test", "Windows"), "C:\\Users\\test");
        assert_eq!(normalize_path_for_os("C:\\Users\\test", "Linux"), "C:/Users/test");
        assert_eq!(normalize_path_for_os("", "Darwin"), "");
    }
}
